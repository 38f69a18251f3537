use camino::{Utf8Path, Utf8PathBuf};
use xshell::{Shell, cmd};

use crate::config::ToolchainConfig;
use crate::error::BuildError;
use crate::symbols::SymbolTable;

/// Inputs for one compilation of a design into a loadable model.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub sources: Vec<Utf8PathBuf>,
    pub flags: Vec<String>,
    /// Top module; defaults to the stem of the first source file.
    pub top: Option<String>,
}

impl BuildRequest {
    pub fn new<P: Into<Utf8PathBuf>>(sources: impl IntoIterator<Item = P>) -> Self {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            flags: Vec::new(),
            top: None,
        }
    }

    pub fn with_flags<S: Into<String>>(mut self, flags: impl IntoIterator<Item = S>) -> Self {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    pub fn with_top(mut self, top: impl Into<String>) -> Self {
        self.top = Some(top.into());
        self
    }

    pub fn top_module(&self) -> Result<String, BuildError> {
        if let Some(top) = &self.top {
            return Ok(top.clone());
        }
        self.sources
            .first()
            .and_then(|path| path.file_stem())
            .map(str::to_string)
            .ok_or(BuildError::NoSources)
    }
}

/// Output of a successful compilation. Opaque to everything except the
/// loader that turns it into a running model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub top: String,
    pub dir: Utf8PathBuf,
    /// Loadable model produced by the compiler.
    pub library: Utf8PathBuf,
    /// Symbol table sidecar describing the model's state layout.
    pub symbols: Utf8PathBuf,
}

impl Artifact {
    pub fn in_dir(dir: &Utf8Path, top: &str) -> Self {
        let prefix = format!("V{top}");
        Self {
            top: top.to_string(),
            dir: dir.to_owned(),
            library: dir.join(format!("lib{prefix}.so")),
            symbols: dir.join(format!("{prefix}.symbols.json")),
        }
    }
}

pub trait Toolchain {
    fn compile(&self, request: &BuildRequest) -> Result<Artifact, BuildError>;
}

/// Verilator invoked as an external process.
#[derive(Debug, Clone, Default)]
pub struct Verilator {
    config: ToolchainConfig,
}

impl Verilator {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    fn output_dir(&self, top: &str) -> Utf8PathBuf {
        self.config.build_dir.join(top)
    }
}

impl Toolchain for Verilator {
    fn compile(&self, request: &BuildRequest) -> Result<Artifact, BuildError> {
        if request.sources.is_empty() {
            return Err(BuildError::NoSources);
        }
        if let Some(missing) = request.sources.iter().find(|path| !path.exists()) {
            return Err(BuildError::MissingSource(missing.clone()));
        }

        let top = request.top_module()?;
        let out_dir = self.output_dir(&top);
        std::fs::create_dir_all(&out_dir).map_err(|source| BuildError::BuildDir {
            path: out_dir.clone(),
            source,
        })?;

        let program = &self.config.verilator;
        let prefix = format!("V{top}");
        let config_flags = &self.config.flags;
        let flags = &request.flags;
        let sources = &request.sources;

        let sh = Shell::new().map_err(|e| BuildError::Spawn {
            program: program.clone(),
            message: e.to_string(),
        })?;

        log::debug!("compiling {top} with {program} into {out_dir}");
        let output = cmd!(
            sh,
            "{program}
             --cc
             --build
             --trace
             --prefix {prefix}
             --top-module {top}
             --lib-create {prefix}
             -Mdir {out_dir}
             {config_flags...}
             {flags...}
             {sources...}"
        )
        .quiet()
        .ignore_status()
        .output()
        .map_err(|e| BuildError::Spawn {
            program: program.clone(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(BuildError::Compile {
                diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        collect_artifact(&out_dir, &top)
    }
}

/// Writes the symbol table for a finished build and checks that everything a
/// loader needs is in place.
fn collect_artifact(dir: &Utf8Path, top: &str) -> Result<Artifact, BuildError> {
    let artifact = Artifact::in_dir(dir, top);
    if !artifact.library.exists() {
        return Err(BuildError::MissingArtifact(artifact.library));
    }

    // Verilator 4.2 and later keep the design state in a separate root class.
    let header = [
        dir.join(format!("V{top}___024root.h")),
        dir.join(format!("V{top}.h")),
    ]
    .into_iter()
    .find(|path| path.exists())
    .ok_or_else(|| BuildError::MissingArtifact(dir.join(format!("V{top}___024root.h"))))?;
    let text = std::fs::read_to_string(&header).map_err(|e| BuildError::Symbols {
        path: header.clone(),
        message: e.to_string(),
    })?;

    let table = SymbolTable::from_header(top, &text);
    log::debug!("found {} signals in {header}", table.states.len());
    let json = table.to_json().map_err(|e| BuildError::Symbols {
        path: artifact.symbols.clone(),
        message: e.to_string(),
    })?;
    std::fs::write(&artifact.symbols, json).map_err(|e| BuildError::Symbols {
        path: artifact.symbols.clone(),
        message: e.to_string(),
    })?;
    Ok(artifact)
}
