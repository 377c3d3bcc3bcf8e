pub mod remote;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use remote::RemoteClassifier;
pub use stub::StubClassifier;

#[cfg(feature = "backend-tract")]
pub use tract::TractClassifier;
