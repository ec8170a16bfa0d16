use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(glyphtap::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(glyphtap::config::invalid))]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    #[diagnostic(code(glyphtap::config::missing_field))]
    MissingField { field: String },

    #[error("Unknown key: {key}")]
    #[diagnostic(
        code(glyphtap::config::unknown_key),
        help("Use a key name such as `Q`, `Slash`, `Grave` or a raw code like `KEY_183`")
    )]
    UnknownKey {
        key: String,
        #[source_code]
        src: String,
        #[label("unknown key")]
        span: miette::SourceSpan,
    },

    #[error("Key {key} is mapped more than once")]
    #[diagnostic(code(glyphtap::config::duplicate_mapping))]
    DuplicateMapping {
        key: String,
        #[source_code]
        src: String,
        #[label("second mapping")]
        span: miette::SourceSpan,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
