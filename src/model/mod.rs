//! Classifier backbone and tensor helpers.

mod classifier;

pub use classifier::{argmax_rows, cross_entropy, softmax, SoftmaxClassifier};
