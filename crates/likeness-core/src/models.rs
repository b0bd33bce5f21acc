//! Model catalogue and source (local directory or remote base URL).

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Whole-request limit for a remote model download.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    NotFound(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("fetch {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("unexpected model output: {0}")]
    BadOutput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// The five networks the analyzer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Detector,
    Landmarks,
    Recognition,
    Expression,
    AgeGender,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::Detector,
        ModelKind::Landmarks,
        ModelKind::Recognition,
        ModelKind::Expression,
        ModelKind::AgeGender,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ModelKind::Detector => "det_10g.onnx",
            ModelKind::Landmarks => "landmark_68.onnx",
            ModelKind::Recognition => "w600k_r50.onnx",
            ModelKind::Expression => "emotion-ferplus-8.onnx",
            ModelKind::AgeGender => "genderage.onnx",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelKind::Detector => "detector",
            ModelKind::Landmarks => "landmarks",
            ModelKind::Recognition => "recognition",
            ModelKind::Expression => "expression",
            ModelKind::AgeGender => "age/gender",
        };
        f.write_str(name)
    }
}

/// Where model files are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Directory(PathBuf),
    Remote(String),
}

impl ModelSource {
    /// `http://` and `https://` values are remote; anything else is a directory.
    pub fn parse(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            ModelSource::Remote(value.trim_end_matches('/').to_string())
        } else {
            ModelSource::Directory(PathBuf::from(value))
        }
    }

    /// Location of one model file, as a path or URL string.
    pub fn location(&self, kind: ModelKind) -> String {
        match self {
            ModelSource::Directory(dir) => dir.join(kind.file_name()).to_string_lossy().into_owned(),
            ModelSource::Remote(base) => format!("{base}/{}", kind.file_name()),
        }
    }

    /// Read the raw ONNX bytes for one model. `client` is only used for remote sources.
    pub async fn fetch(&self, client: &reqwest::Client, kind: ModelKind) -> Result<Vec<u8>, ModelError> {
        let location = self.location(kind);
        match self {
            ModelSource::Directory(_) => match tokio::fs::read(&location).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(ModelError::NotFound(location))
                }
                Err(source) => Err(ModelError::Read { path: location, source }),
            },
            ModelSource::Remote(_) => {
                tracing::debug!(url = %location, model = %kind, "fetching model");
                let response = client.get(&location).send().await.map_err(|source| ModelError::Fetch {
                    url: location.clone(),
                    source,
                })?;
                let status = response.status();
                if !status.is_success() {
                    return Err(ModelError::Status { url: location, status: status.as_u16() });
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|source| ModelError::Fetch { url: location.clone(), source })?;
                Ok(bytes.to_vec())
            }
        }
    }
}

/// HTTP client for remote sources; a stalled server fails the fetch after `timeout`.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ModelError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .build()
        .map_err(ModelError::Client)
}

impl Default for ModelSource {
    fn default() -> Self {
        ModelSource::Directory(default_model_dir())
    }
}

/// `$XDG_DATA_HOME/likeness/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("likeness/models")
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Directory(dir) => write!(f, "{}", dir.display()),
            ModelSource::Remote(base) => f.write_str(base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote_and_directory() {
        assert_eq!(
            ModelSource::parse("https://cdn.example.com/models/"),
            ModelSource::Remote("https://cdn.example.com/models".into())
        );
        assert_eq!(
            ModelSource::parse("/opt/likeness/models"),
            ModelSource::Directory(PathBuf::from("/opt/likeness/models"))
        );
    }

    #[test]
    fn test_locations() {
        let remote = ModelSource::parse("https://cdn.example.com/m");
        assert_eq!(remote.location(ModelKind::Recognition), "https://cdn.example.com/m/w600k_r50.onnx");

        let dir = ModelSource::parse("/models");
        assert_eq!(dir.location(ModelKind::Detector), "/models/det_10g.onnx");
    }

    #[test]
    fn test_five_distinct_model_files() {
        let mut names: Vec<_> = ModelKind::ALL.iter().map(|k| k.file_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 5);
    }

    #[tokio::test]
    async fn test_fetch_missing_directory_file() {
        let source = ModelSource::Directory(PathBuf::from("/nonexistent/likeness-models"));
        let client = http_client(DEFAULT_FETCH_TIMEOUT).unwrap();
        let err = source.fetch(&client, ModelKind::Detector).await.unwrap_err();
        assert!(matches!(err, ModelError::NotFound(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_fetch_reads_local_file() {
        let dir = std::env::temp_dir().join(format!("likeness-models-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(ModelKind::Expression.file_name()), b"onnx").unwrap();

        let client = http_client(DEFAULT_FETCH_TIMEOUT).unwrap();
        let bytes = ModelSource::Directory(dir.clone())
            .fetch(&client, ModelKind::Expression)
            .await
            .unwrap();
        assert_eq!(bytes, b"onnx");
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_stalled_server_times_out() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = http_client(Duration::from_millis(200)).unwrap();
        let source = ModelSource::parse(&format!("http://{addr}/models"));
        let started = std::time::Instant::now();
        let err = source.fetch(&client, ModelKind::Detector).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            ModelError::Fetch { url, source } => {
                assert!(url.ends_with("/models/det_10g.onnx"));
                assert!(source.is_timeout(), "got {source:?}");
            }
            other => panic!("expected fetch timeout, got {other:?}"),
        }
        server.abort();
    }
}
