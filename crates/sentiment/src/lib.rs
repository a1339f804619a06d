//! News sentiment: the classifier adapter over LLM providers and the
//! time-weighted stock-level aggregation.

pub mod classifier;
pub mod providers;
pub mod weighting;

pub use classifier::{
    ArticleForClassification, Classifier, ClassifierError, DeadlineClassifier, StubClassifier,
    WeightedClassifier,
};
pub use providers::{OllamaClassifier, OpenAiClassifier};
pub use weighting::{NewsAggregate, TimeWeightProfile, TimeWeightedAnalyzer};
