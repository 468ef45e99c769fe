pub mod cdc_event;
pub mod debezium;
pub mod headers;
pub mod sse_frame;
pub mod validation;
