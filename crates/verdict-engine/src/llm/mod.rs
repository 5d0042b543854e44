pub mod candidates;
pub mod classify;
pub mod dispatch;
pub mod parse;

pub use candidates::{resolve_candidates, CandidateList, CredentialSet};
pub use classify::{classify, FailureKind};
pub use dispatch::{
    dispatch_keys, dispatch_models, AttemptDiagnostics, AttemptOutcome, DispatchDiagnostics,
    DispatchError, Dispatched, Dispatcher, ModelSources,
};
pub use parse::{decode_object, decode_with_strategy, DecodeStrategy, JsonObject, MalformedResponseError};
