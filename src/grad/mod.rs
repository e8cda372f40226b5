mod backward;

pub use backward::{BackwardEngine, BackwardReport, FeedbackRequest, backward};
