pub mod analyzer;
pub mod config;
pub mod domain;
pub mod error;
pub mod link_checker;
pub mod pool;
pub mod repository;
pub mod robots;
pub mod worker;

pub use analyzer::{Analyzer, HtmlAnalyzer};
pub use config::PoolConfig;
pub use domain::{AnalysisResult, Link, Status, UrlRecord};
pub use error::{AnalyzeError, RepositoryError};
pub use link_checker::LinkChecker;
pub use pool::{ControlCommand, Pool};
pub use repository::UrlRepository;
pub use robots::RobotsCache;
pub use worker::{CrawlResult, PriorityTask, Worker};
