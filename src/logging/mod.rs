pub mod report_logger;
