pub mod classifier_llm;
pub mod db;
pub mod face_swap;
pub mod session_store;
pub mod storage;

pub use classifier_llm::OpenAiClassifierAdapter;
pub use db::DbAdapter;
pub use face_swap::ReplicateAdapter;
pub use session_store::FileSessionStore;
pub use storage::BackendStorageAdapter;
