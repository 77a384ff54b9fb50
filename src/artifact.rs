//! HTTP client for the remote artifact storage API.

use std::time::Duration;

use guard_core::{ArtifactApi, CleanupError};
use reqwest::{blocking::Client, StatusCode};
use tracing::debug;

/// Deletes artifacts with `DELETE {base_url}/files/{file_id}`.
#[derive(Debug, Clone)]
pub struct HttpArtifactApi {
    client: Client,
    base_url: String,
}

impl HttpArtifactApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CleanupError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CleanupError::Failed(format!("artifact API client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.base_url, urlencoding::encode(file_id))
    }
}

impl ArtifactApi for HttpArtifactApi {
    fn delete_artifact(&self, file_id: &str) -> Result<(), CleanupError> {
        let url = self.file_url(file_id);
        debug!(%url, "sending artifact delete");
        let response = self.client.delete(&url).send().map_err(|err| {
            if err.is_timeout() || err.is_connect() {
                CleanupError::Transient(err.to_string())
            } else {
                CleanupError::Failed(err.to_string())
            }
        })?;
        classify_status(response.status(), file_id)
    }
}

fn classify_status(status: StatusCode, file_id: &str) -> Result<(), CleanupError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::NOT_FOUND {
        Err(CleanupError::NotFound(file_id.to_string()))
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(CleanupError::Transient(format!("artifact API returned {status}")))
    } else {
        Err(CleanupError::Failed(format!("artifact API returned {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::{Read, Write},
        net::TcpListener,
        thread,
    };

    /// Serves one canned response per entry and returns the request lines seen.
    fn serve(responses: Vec<&'static str>) -> (String, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().expect("accept");
                let mut buffer = [0u8; 4096];
                let read = stream.read(&mut buffer).expect("read request");
                let request = String::from_utf8_lossy(&buffer[..read]).to_string();
                seen.push(request.lines().next().unwrap_or_default().to_string());
                stream.write_all(response.as_bytes()).expect("write response");
            }
            seen
        });
        (base, handle)
    }

    #[test]
    fn ids_are_percent_encoded() {
        let api = HttpArtifactApi::new("https://files.example.com/api/", Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            api.file_url("a b/../c"),
            "https://files.example.com/api/files/a%20b%2F..%2Fc"
        );
    }

    #[test]
    fn status_codes_map_to_cleanup_errors() {
        assert!(classify_status(StatusCode::NO_CONTENT, "f").is_ok());
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "f"),
            Err(CleanupError::NotFound(_))
        ));
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "f")
            .unwrap_err()
            .is_transient());
        assert!(!classify_status(StatusCode::FORBIDDEN, "f")
            .unwrap_err()
            .is_transient());
    }

    #[test]
    fn delete_hits_files_endpoint() {
        let (base, server) = serve(vec![
            "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n",
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ]);
        let api = HttpArtifactApi::new(&base, Duration::from_secs(5)).unwrap();

        assert!(api.delete_artifact("fileA").is_ok());
        let err = api.delete_artifact("fileA").unwrap_err();
        assert!(err.is_transient());

        let seen = server.join().unwrap();
        assert_eq!(seen, vec!["DELETE /files/fileA HTTP/1.1"; 2]);
    }

    #[test]
    fn unreachable_api_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let api = HttpArtifactApi::new(&base, Duration::from_millis(500)).unwrap();
        assert!(api.delete_artifact("fileA").unwrap_err().is_transient());
    }
}
