//! Purpose: Map accessions to local files, remote URLs, and cache locations.
//! Exports: `VPath`, `ResolverConfig`, `RemoteMode`, `Resolver`, `Query`, `QueryResult`.
//! Role: Backs the accession helpers and the CLI's handling of non-path sources.
//! Invariants: Local candidates are probed per repository in a fixed order.
//! Invariants: Without a locator URL remote paths are built from the public bucket pattern.
//! Invariants: Only accession paths resolve; files and URLs are returned to callers as is.
#![allow(clippy::result_large_err)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::core::error::{Error, ErrorKind};

pub const ACC_SCHEME: &str = "ncbi-acc";
pub const PUBLIC_BUCKET_URL: &str = "https://sra-pub-run-odp.s3.amazonaws.com/sra";
pub const ENV_REPOSITORY: &str = "VDBDUMP_REPOSITORY";
pub const ENV_CACHE_DIR: &str = "VDBDUMP_CACHE_DIR";
pub const ENV_RESOLVER_URL: &str = "VDBDUMP_RESOLVER_URL";
pub const ENV_REMOTE: &str = "VDBDUMP_REMOTE";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VPath {
    Accession(String),
    File(PathBuf),
    Url(Url),
}

impl VPath {
    pub fn from_accession(accession: &str) -> Result<Self, Error> {
        let accession = strip_scheme(accession.trim());
        if accession.is_empty()
            || accession
                .chars()
                .any(|c| c.is_whitespace() || c == '/' || c == '\\')
        {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid accession '{accession}'")));
        }
        Ok(Self::Accession(accession.to_string()))
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        if has_scheme(text) {
            return Self::from_accession(text);
        }
        if text.starts_with("http://") || text.starts_with("https://") {
            let url = Url::parse(text).map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("invalid url '{text}'"))
                    .with_source(err)
            })?;
            return Ok(Self::Url(url));
        }
        Ok(Self::File(PathBuf::from(text)))
    }

    pub fn accession(&self) -> Option<&str> {
        match self {
            Self::Accession(acc) => Some(acc),
            _ => None,
        }
    }
}

impl fmt::Display for VPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accession(acc) => write!(f, "{ACC_SCHEME}:{acc}"),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url.as_str()),
        }
    }
}

/// Strips one leading `ncbi-acc:` (any case).
pub fn strip_scheme(text: &str) -> &str {
    if has_scheme(text) {
        &text[ACC_SCHEME.len() + 1..]
    } else {
        text
    }
}

fn has_scheme(text: &str) -> bool {
    let scheme = ACC_SCHEME.as_bytes();
    text.as_bytes()
        .get(..=scheme.len())
        .is_some_and(|prefix| {
            prefix[..scheme.len()].eq_ignore_ascii_case(scheme) && prefix[scheme.len()] == b':'
        })
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RemoteMode {
    /// Remote lookups only when nothing local was found.
    #[default]
    Auto,
    Always,
    Never,
}

impl RemoteMode {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "always" => Some(Self::Always),
            "never" => Some(Self::Never),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Always => "always",
            Self::Never => "never",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResolverConfig {
    pub repositories: Vec<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub locator_url: Option<Url>,
    pub remote: RemoteMode,
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            repositories: vec![default_repository_dir()],
            cache_dir: None,
            locator_url: None,
            remote: RemoteMode::Auto,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ResolverConfig {
    /// Defaults overridden by the `VDBDUMP_*` environment variables.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(value) = std::env::var_os(ENV_REPOSITORY) {
            let dirs: Vec<PathBuf> = std::env::split_paths(&value)
                .filter(|dir| !dir.as_os_str().is_empty())
                .collect();
            if !dirs.is_empty() {
                config.repositories = dirs;
            }
        }
        if let Some(value) = std::env::var_os(ENV_CACHE_DIR)
            && !value.is_empty()
        {
            config.cache_dir = Some(PathBuf::from(value));
        }
        if let Ok(value) = std::env::var(ENV_RESOLVER_URL)
            && !value.trim().is_empty()
        {
            config.locator_url = Some(parse_locator_url(&value)?);
        }
        if let Ok(value) = std::env::var(ENV_REMOTE) {
            config.remote = RemoteMode::parse(&value).ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("invalid {ENV_REMOTE} value '{value}'"))
                    .with_hint("Use auto, always, or never.")
            })?;
        }
        Ok(config)
    }
}

pub fn default_repository_dir() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join("ncbi").join("public")
}

pub fn parse_locator_url(text: &str) -> Result<Url, Error> {
    let url = Url::parse(text.trim()).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid resolver url '{text}'"))
            .with_source(err)
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("unsupported resolver url scheme '{other}'"))),
    }
}

/// Which locations a query should produce.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Query {
    pub local: bool,
    pub remote: bool,
    pub cache: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct QueryResult {
    pub local: Option<VPath>,
    pub remote: Option<VPath>,
    pub cache: Option<VPath>,
}

pub struct Resolver {
    config: ResolverConfig,
    remote: RemoteMode,
    agent: ureq::Agent,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self {
            remote: config.remote,
            config,
            agent,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn remote_enable(&mut self, mode: RemoteMode) {
        self.remote = mode;
    }

    /// Fails with `NotFound` when none of the requested locations resolve.
    pub fn query(&self, path: &VPath, query: Query) -> Result<QueryResult, Error> {
        let accession = path.accession().ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("'{path}' is not an accession"))
        })?;

        let mut result = QueryResult::default();
        if query.local {
            result.local = self.local(accession).map(VPath::File);
        }
        if query.cache {
            result.cache = self.cache_path(accession).map(VPath::File);
        }

        let mut remote_err = None;
        let try_remote = match self.remote {
            RemoteMode::Always => query.remote,
            RemoteMode::Auto => query.remote && result.local.is_none(),
            RemoteMode::Never => false,
        };
        if try_remote {
            match self.remote(accession) {
                Ok(url) => result.remote = Some(VPath::Url(url)),
                Err(err) => {
                    tracing::debug!(accession, error = %err, "remote resolution failed");
                    remote_err = Some(err);
                }
            }
        }

        let found = (query.local && result.local.is_some())
            || (query.remote && result.remote.is_some())
            || (query.cache && result.cache.is_some());
        if found {
            return Ok(result);
        }
        Err(remote_err.unwrap_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message(format!("accession '{accession}' not found"))
                .with_hint("Add a repository with --repository or allow remote lookups.")
        }))
    }

    fn local(&self, accession: &str) -> Option<PathBuf> {
        self.config
            .repositories
            .iter()
            .flat_map(|repo| local_candidates(repo, accession))
            .find(|candidate| candidate.exists())
    }

    fn cache_path(&self, accession: &str) -> Option<PathBuf> {
        let root = self
            .config
            .cache_dir
            .as_ref()
            .or_else(|| self.config.repositories.first())?;
        Some(root.join("sra").join(format!("{accession}.sra")))
    }

    fn remote(&self, accession: &str) -> Result<Url, Error> {
        match &self.config.locator_url {
            Some(locator) => self.ask_locator(locator, accession),
            None => public_bucket_url(accession),
        }
    }

    fn ask_locator(&self, locator: &Url, accession: &str) -> Result<Url, Error> {
        let mut url = locator.clone();
        url.query_pairs_mut().append_pair("acc", accession);
        tracing::debug!(url = %url, "querying locator");
        let response = self
            .agent
            .request("GET", url.as_str())
            .set("Accept", "application/json")
            .call();
        let envelope: LocatorEnvelope = match response {
            Ok(resp) => read_json_response(resp)?,
            Err(ureq::Error::Status(code, _)) => {
                return Err(Error::new(error_kind_from_status(code))
                    .with_message(format!("locator returned status {code}"))
                    .with_path(url.as_str()));
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("locator request failed")
                    .with_path(url.as_str())
                    .with_source(err));
            }
        };
        pick_link(envelope, accession)
    }
}

fn local_candidates(repo: &Path, accession: &str) -> [PathBuf; 3] {
    let file = format!("{accession}.sra");
    [
        repo.join(accession),
        repo.join(&file),
        repo.join("sra").join(&file),
    ]
}

fn public_bucket_url(accession: &str) -> Result<Url, Error> {
    let text = format!("{PUBLIC_BUCKET_URL}/{accession}/{accession}");
    Url::parse(&text).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message(format!("failed to build url for '{accession}'"))
            .with_source(err)
    })
}

#[derive(Deserialize)]
struct LocatorEnvelope {
    #[serde(default)]
    result: Vec<LocatorBundle>,
}

#[derive(Deserialize)]
struct LocatorBundle {
    bundle: String,
    #[serde(default = "ok_status")]
    status: u16,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    files: Vec<LocatorFile>,
}

#[derive(Deserialize)]
struct LocatorFile {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    locations: Vec<LocatorLocation>,
}

#[derive(Deserialize)]
struct LocatorLocation {
    link: String,
}

fn ok_status() -> u16 {
    200
}

fn pick_link(envelope: LocatorEnvelope, accession: &str) -> Result<Url, Error> {
    let bundle = envelope
        .result
        .iter()
        .find(|bundle| bundle.bundle.eq_ignore_ascii_case(accession))
        .or_else(|| envelope.result.first())
        .ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message(format!("locator has no entry for '{accession}'"))
        })?;
    if bundle.status != 200 {
        let message = bundle
            .msg
            .clone()
            .unwrap_or_else(|| format!("locator status {}", bundle.status));
        return Err(Error::new(error_kind_from_status(bundle.status)).with_message(message));
    }

    let first_link = |file: &LocatorFile| file.locations.first().map(|loc| loc.link.clone());
    let link = bundle
        .files
        .iter()
        .filter(|file| file.kind.eq_ignore_ascii_case("sra"))
        .find_map(first_link)
        .or_else(|| bundle.files.iter().find_map(first_link))
        .ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message(format!("locator has no link for '{accession}'"))
        })?;
    if let Some(name) = bundle.files.iter().find_map(|file| file.name.as_deref()) {
        tracing::trace!(accession, name, "locator file");
    }
    Url::parse(&link).map_err(|err| {
        Error::new(ErrorKind::Corrupt)
            .with_message(format!("locator returned invalid link '{link}'"))
            .with_source(err)
    })
}

fn read_json_response<R>(response: ureq::Response) -> Result<R, Error>
where
    R: serde::de::DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read locator response")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Corrupt)
            .with_message("invalid locator json")
            .with_source(err)
    })
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 => ErrorKind::Usage,
        401 | 403 => ErrorKind::Permission,
        404 | 410 => ErrorKind::NotFound,
        _ => ErrorKind::Internal,
    }
}
