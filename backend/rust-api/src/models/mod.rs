pub mod catalog;
pub mod event;
pub mod session;
pub mod submission;

pub use catalog::{CatalogBundle, Question, QuestionOption, TestDefinition};
pub use event::{RunningTestsEvent, SessionAction};
pub use session::{
    AnswerKeySnapshot, ListState, PaperOption, PaperQuestion, QuestionOutcome, RunningRef,
    RunningSession, SessionSummary, SnapshotQuestion, StopResponse, StudentResult, TestListing,
};
pub use submission::{
    BeginResponse, LaunchRequest, PendingStatus, PendingSubmission, RawAnswer, RawAnswers,
    SubmitAnswersRequest,
};
