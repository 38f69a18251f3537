use camino::Utf8PathBuf;

/// Failure of the delegated hardware compiler.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no source files given")]
    NoSources,

    #[error("source file not found: {0}")]
    MissingSource(Utf8PathBuf),

    #[error("failed to run {program}: {message}")]
    Spawn { program: String, message: String },

    /// The compiler ran and rejected the design. `diagnostics` is its
    /// output, unmodified.
    #[error("{diagnostics}")]
    Compile { diagnostics: String },

    #[error("build directory {path}: {source}")]
    BuildDir {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    /// The compiler reported success but an expected output is missing.
    #[error("build finished without producing {0}")]
    MissingArtifact(Utf8PathBuf),

    #[error("failed to write symbol table {path}: {message}")]
    Symbols { path: Utf8PathBuf, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: Utf8PathBuf, message: String },
}
