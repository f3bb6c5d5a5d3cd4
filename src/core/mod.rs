pub mod llm;
pub mod model;
pub mod normalize;
pub mod similarity;

pub use model::{ElementType, NewElement, PageReference, ReferenceType, SharedDataElement};
pub use normalize::Contact;
pub use similarity::SimilarityScorer;
