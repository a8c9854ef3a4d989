use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::{Blob, EntryKind, RepoContext, RepositoryClient, RepositoryError, RevisionId, TreeEntry};

const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const CLIENT_USER_AGENT: &str = concat!("codexai/", env!("CARGO_PKG_VERSION"));

#[derive(Deserialize)]
struct RepoDetails {
    default_branch: String,
}

#[derive(Deserialize)]
struct BranchResponse {
    commit: BranchCommit,
}

#[derive(Deserialize)]
struct BranchCommit {
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    tree: TreeRef,
}

#[derive(Deserialize)]
struct TreeRef {
    sha: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<GitTreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct GitTreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Deserialize)]
struct ContentFile {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
    sha: String,
}

#[derive(Serialize)]
struct PutContentRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    branch: &'a str,
}

#[derive(Deserialize)]
struct PutContentResponse {
    content: PutContent,
}

#[derive(Deserialize)]
struct PutContent {
    sha: String,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// GitHub REST client for the contents and git-data APIs.
#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    base_url: String,
}

impl Default for GitHubClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GitHubClient {
    pub fn new() -> Self {
        Self::with_base_url(GITHUB_API_BASE)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, RepositoryError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RepositoryError::Transport(format!("Invalid API base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| RepositoryError::Transport("Invalid API base URL".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn repo_url(&self, ctx: &RepoContext, rest: &[&str]) -> Result<Url, RepositoryError> {
        let mut segments = vec!["repos", ctx.repo.owner.as_str(), ctx.repo.repo.as_str()];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    fn authorized(&self, builder: RequestBuilder, ctx: &RepoContext) -> RequestBuilder {
        builder
            .header(AUTHORIZATION, format!("Bearer {}", ctx.token))
            .header(ACCEPT, GITHUB_ACCEPT)
            .header(USER_AGENT, CLIENT_USER_AGENT)
    }

    async fn resolve_branch(&self, ctx: &RepoContext) -> Result<String, RepositoryError> {
        if let Some(branch) = &ctx.repo.branch {
            return Ok(branch.clone());
        }

        let url = self.repo_url(ctx, &[])?;
        let response = self.authorized(self.client.get(url), ctx).send().await?;
        if !response.status().is_success() {
            let (status, message) = failure_details(response).await;
            return Err(if status == StatusCode::NOT_FOUND {
                RepositoryError::NotFound(format!(
                    "Repository not found: {}",
                    ctx.repo.full_name()
                ))
            } else {
                RepositoryError::Transport(format!("Failed to fetch repo details: {}", message))
            });
        }

        let details: RepoDetails = response.json().await?;
        Ok(details.default_branch)
    }

    /// Contents API metadata for one file. Directories and submodules are `NotFound`.
    async fn fetch_contents(&self, ctx: &RepoContext, path: &str) -> Result<ContentFile, RepositoryError> {
        let mut segments = vec!["contents"];
        segments.extend(path.split('/'));
        let mut url = self.repo_url(ctx, &segments)?;
        if let Some(branch) = &ctx.repo.branch {
            url.query_pairs_mut().append_pair("ref", branch);
        }

        let response = self.authorized(self.client.get(url), ctx).send().await?;
        if !response.status().is_success() {
            let (status, message) = failure_details(response).await;
            return Err(if status == StatusCode::NOT_FOUND {
                RepositoryError::NotFound(format!("Could not fetch file content for: {}", path))
            } else {
                RepositoryError::Transport(format!(
                    "Could not fetch file content for {}: {}",
                    path, message
                ))
            });
        }

        let value: serde_json::Value = response.json().await?;
        if value.is_array() {
            return Err(RepositoryError::NotFound(format!(
                "Path is a directory, not a file: {}",
                path
            )));
        }
        let file: ContentFile = serde_json::from_value(value)
            .map_err(|e| RepositoryError::InvalidResponse(format!("Unexpected contents response: {}", e)))?;
        if file.kind != "file" {
            return Err(RepositoryError::NotFound(format!("Not a file: {}", path)));
        }
        Ok(file)
    }
}

#[async_trait]
impl RepositoryClient for GitHubClient {
    async fn get_tree(&self, ctx: &RepoContext) -> Result<Vec<TreeEntry>, RepositoryError> {
        let branch = self.resolve_branch(ctx).await?;
        tracing::debug!(repo = %ctx.repo.full_name(), %branch, "fetching repository tree");

        let url = self.repo_url(ctx, &["branches", &branch])?;
        let response = self.authorized(self.client.get(url), ctx).send().await?;
        if !response.status().is_success() {
            let (status, message) = failure_details(response).await;
            return Err(if status == StatusCode::NOT_FOUND {
                RepositoryError::NotFound(format!("Branch not found: {}", branch))
            } else {
                RepositoryError::Transport(format!("Failed to fetch branch {}: {}", branch, message))
            });
        }
        let branch_data: BranchResponse = response.json().await?;
        let tree_sha = branch_data.commit.commit.tree.sha;

        let mut url = self.repo_url(ctx, &["git", "trees", &tree_sha])?;
        url.query_pairs_mut().append_pair("recursive", "1");
        let response = self.authorized(self.client.get(url), ctx).send().await?;
        if !response.status().is_success() {
            let (_, message) = failure_details(response).await;
            return Err(RepositoryError::Transport(format!(
                "Could not fetch repository file tree: {}",
                message
            )));
        }

        let tree_data: TreeResponse = response.json().await?;
        if tree_data.truncated {
            tracing::warn!(repo = %ctx.repo.full_name(), "file tree is truncated, some files will be missing");
        }

        Ok(tree_data
            .tree
            .into_iter()
            .filter_map(|item| {
                let kind = match item.kind.as_str() {
                    "blob" => EntryKind::Blob,
                    "tree" => EntryKind::Tree,
                    // Submodules show up as commits.
                    _ => return None,
                };
                Some(TreeEntry {
                    path: item.path,
                    kind,
                    revision: RevisionId(item.sha),
                })
            })
            .collect())
    }

    async fn get_blob(&self, ctx: &RepoContext, path: &str) -> Result<Blob, RepositoryError> {
        let file = self.fetch_contents(ctx, path).await?;
        let content = file_text(path, &file)?;
        Ok(Blob {
            content,
            revision: RevisionId(file.sha),
        })
    }

    async fn get_revision(
        &self,
        ctx: &RepoContext,
        path: &str,
    ) -> Result<Option<RevisionId>, RepositoryError> {
        match self.fetch_contents(ctx, path).await {
            Ok(file) => Ok(Some(RevisionId(file.sha))),
            Err(RepositoryError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn put_blob(
        &self,
        ctx: &RepoContext,
        path: &str,
        content: &str,
        commit_message: &str,
        expected: Option<&RevisionId>,
    ) -> Result<RevisionId, RepositoryError> {
        let branch = self.resolve_branch(ctx).await?;
        let mut segments = vec!["contents"];
        segments.extend(path.split('/'));
        let url = self.repo_url(ctx, &segments)?;

        let request = PutContentRequest {
            message: commit_message,
            content: STANDARD.encode(content),
            sha: expected.map(RevisionId::as_str),
            branch: &branch,
        };
        tracing::debug!(%path, %branch, update = expected.is_some(), "writing file");

        let response = self
            .authorized(self.client.put(url), ctx)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            let (status, message) = failure_details(response).await;
            return Err(classify_write_failure(status, &message, path, expected.is_none()));
        }

        let written: PutContentResponse = response.json().await?;
        Ok(RevisionId(written.content.sha))
    }

    async fn download_archive(&self, ctx: &RepoContext) -> Result<Vec<u8>, RepositoryError> {
        let branch = self.resolve_branch(ctx).await?;
        let url = self.repo_url(ctx, &["zipball", &branch])?;

        let response = self.authorized(self.client.get(url), ctx).send().await?;
        if !response.status().is_success() {
            let (_, message) = failure_details(response).await;
            return Err(RepositoryError::Transport(format!(
                "Failed to download repository zip: {}",
                message
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Status code plus the API's `message` field, or the raw body when it has none.
async fn failure_details(response: Response) -> (StatusCode, String) {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiError>(&text)
        .map(|error| error.message)
        .unwrap_or_else(|_| {
            if text.is_empty() {
                status.to_string()
            } else {
                text
            }
        });
    (status, message)
}

fn classify_write_failure(
    status: StatusCode,
    message: &str,
    path: &str,
    creating: bool,
) -> RepositoryError {
    match status {
        StatusCode::CONFLICT => RepositoryError::Conflict(format!("Failed to update file: {}", message)),
        // GitHub answers a create over an existing file with 422 asking for its sha.
        StatusCode::UNPROCESSABLE_ENTITY if creating && message.contains("sha") => {
            RepositoryError::AlreadyExists(format!("File already exists at path: {}", path))
        }
        StatusCode::UNPROCESSABLE_ENTITY if !creating => {
            RepositoryError::Conflict(format!("Failed to update file: {}", message))
        }
        StatusCode::NOT_FOUND => RepositoryError::NotFound(format!("Failed to write file: {}", message)),
        _ => RepositoryError::Transport(format!("Failed to write file: {}", message)),
    }
}

/// Files over 1 MB come back with `encoding: "none"` and no content.
fn file_text(path: &str, file: &ContentFile) -> Result<String, RepositoryError> {
    match file.encoding.as_deref() {
        Some("base64") => decode_content(path, file.content.as_deref().unwrap_or_default()),
        encoding => Err(RepositoryError::InvalidResponse(format!(
            "{} is too large to display (content encoding: {})",
            path,
            encoding.unwrap_or("missing")
        ))),
    }
}

/// The contents API wraps base64 at 60 columns.
fn decode_content(path: &str, encoded: &str) -> Result<String, RepositoryError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| RepositoryError::InvalidResponse(format!("Invalid content encoding for {}: {}", path, e)))?;
    String::from_utf8(bytes)
        .map_err(|_| RepositoryError::InvalidResponse(format!("{} is not a UTF-8 text file", path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepoInfo;

    fn ctx() -> RepoContext {
        RepoContext::new("token", RepoInfo::new("octocat", "hello-world"))
    }

    #[test]
    fn test_repo_url_encodes_path_segments() {
        let client = GitHubClient::with_base_url("https://api.github.com/");
        let url = client
            .repo_url(&ctx(), &["contents", "docs", "my file.md"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/octocat/hello-world/contents/docs/my%20file.md"
        );
    }

    #[test]
    fn test_decode_content_with_wrapped_lines() {
        let encoded = "aGVs\nbG8g\nd29y\nbGQ=\n";
        assert_eq!(decode_content("a.txt", encoded).unwrap(), "hello world");
    }

    #[test]
    fn test_large_file_without_content_is_an_error() {
        let file: ContentFile = serde_json::from_value(serde_json::json!({
            "type": "file",
            "content": "",
            "encoding": "none",
            "sha": "3d21ec53",
        }))
        .unwrap();
        let error = file_text("dist/bundle.js", &file).unwrap_err();
        assert_eq!(
            error,
            RepositoryError::InvalidResponse(
                "dist/bundle.js is too large to display (content encoding: none)".to_string()
            )
        );
    }

    #[test]
    fn test_base64_file_is_decoded() {
        let file: ContentFile = serde_json::from_value(serde_json::json!({
            "type": "file",
            "content": "aGVsbG8=\n",
            "encoding": "base64",
            "sha": "3d21ec53",
        }))
        .unwrap();
        assert_eq!(file_text("a.txt", &file).unwrap(), "hello");
    }

    #[test]
    fn test_decode_content_rejects_binary() {
        let encoded = STANDARD.encode([0xffu8, 0xfe, 0x00]);
        let error = decode_content("logo.png", &encoded).unwrap_err();
        assert!(matches!(error, RepositoryError::InvalidResponse(_)));
    }

    #[test]
    fn test_create_over_existing_file_is_already_exists() {
        let error = classify_write_failure(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Invalid request.\n\n\"sha\" wasn't supplied.",
            "a.txt",
            true,
        );
        assert_eq!(
            error,
            RepositoryError::AlreadyExists("File already exists at path: a.txt".to_string())
        );
    }

    #[test]
    fn test_stale_revision_is_conflict() {
        let error = classify_write_failure(
            StatusCode::CONFLICT,
            "a.txt does not match 3d21ec53",
            "a.txt",
            false,
        );
        assert_eq!(
            error,
            RepositoryError::Conflict("Failed to update file: a.txt does not match 3d21ec53".to_string())
        );
    }

    #[test]
    fn test_other_failures_keep_api_message() {
        let error = classify_write_failure(StatusCode::FORBIDDEN, "Resource not accessible", "a", true);
        assert_eq!(error.to_string(), "Failed to write file: Resource not accessible");
    }

    #[test]
    fn test_put_request_omits_sha_when_creating() {
        let request = PutContentRequest {
            message: "init",
            content: STANDARD.encode("hello"),
            sha: None,
            branch: "main",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["content"], "aGVsbG8=");
        assert!(json.get("sha").is_none());
    }
}
