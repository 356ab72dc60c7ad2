pub(crate) mod analysis_jobs;
pub(crate) mod health;
pub(crate) mod sessions;
pub(crate) mod videos;
