pub mod preprocess;
pub mod quality_report;
