//! Errors raised by the channel schema and version registry.

use miette::Diagnostic;
use thiserror::Error;

/// Errors from channel registration and version lookups.
#[derive(Debug, Error, Diagnostic)]
pub enum ChannelError {
    /// The channel name is not declared in the graph schema.
    #[error("unknown channel: {name}")]
    #[diagnostic(
        code(flowgraph::channels::unknown),
        help("Declare `{name}` with GraphBuilder::add_channel before referencing it.")
    )]
    Unknown { name: String },

    /// A channel with this name is already declared.
    #[error("duplicate channel: {name}")]
    #[diagnostic(
        code(flowgraph::channels::duplicate),
        help("Channel names must be unique within a graph schema.")
    )]
    Duplicate { name: String },
}
