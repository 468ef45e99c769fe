//! Bridges Debezium change events from a message broker to pull based
//! streams.
//!
//! Records are read by a [`pipeline::consumer::CdcConsumer`], validated into
//! [`conversions::cdc_event::CdcEvent`]s and pushed to an event handler. The
//! [`pipeline::bridge::CdcBridge`] turns that push interface into a
//! cancellable [`futures::Stream`] that a server-sent-events endpoint can
//! forward with [`conversions::sse_frame::SseFrame`].

pub mod conversions;
pub mod pipeline;
