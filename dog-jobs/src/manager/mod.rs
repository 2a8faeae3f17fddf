mod jobs;
mod workers;

pub use jobs::JobManager;
pub use workers::WorkerManager;
