use log::debug;
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::error::Error as _;
use std::time::Duration;
use thiserror::Error;

use super::repo::RepoSlug;
use crate::domain::{Forge, ForgeError, MergeMethod, PullRequest};

pub const GITHUB_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "flake-updater";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const API_VERSION: &str = "2022-11-28";

const AUTO_MERGE_ALLOWED_QUERY: &str = "query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) { autoMergeAllowed }
}";

const ENABLE_AUTO_MERGE_MUTATION: &str = "mutation($id: ID!, $method: PullRequestMergeMethod!, $oid: GitObjectID!) {
  enablePullRequestAutoMerge(input: {pullRequestId: $id, mergeMethod: $method, expectedHeadOid: $oid}) {
    clientMutationId
  }
}";

/// GraphQL endpoint belonging to a REST API base URL.
///
/// `https://api.github.com` maps to `https://api.github.com/graphql`, an
/// Enterprise Server base such as `https://ghe.example/api/v3` to
/// `https://ghe.example/api/graphql`.
#[must_use]
pub fn default_graphql_url(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    let base = base.strip_suffix("/v3").unwrap_or(base);
    format!("{base}/graphql")
}

/// Errors that can occur when interacting with the Github API
#[derive(Debug, Error)]
pub enum GithubError {
    #[error("failed to create HTTP client")]
    ClientInit(#[source] reqwest::Error),

    #[error("invalid API URL {0:?}")]
    InvalidUrl(String),

    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Github API returned status {status} for {url}: {message}")]
    ApiStatus {
        status: StatusCode,
        url: String,
        message: String,
    },

    #[error("failed to parse response from {url}")]
    ParseResponse {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("GraphQL request failed: {0}")]
    GraphQl(String),
}

impl GithubError {
    /// Convert into the platform-neutral error, keeping the cause chain as text.
    fn into_forge(self, operation: &'static str) -> ForgeError {
        let mut reason = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            reason.push_str(": ");
            reason.push_str(&cause.to_string());
            source = cause.source();
        }

        match self {
            Self::ParseResponse { .. } | Self::GraphQl(_) => {
                ForgeError::UnexpectedResponse { operation, reason }
            }
            _ => ForgeError::Request { operation, reason },
        }
    }
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    html_url: String,
    node_id: String,
    head: CommitRef,
}

impl From<PullResponse> for PullRequest {
    fn from(pr: PullResponse) -> Self {
        Self {
            number: pr.number,
            url: pr.html_url,
            node_id: pr.node_id,
            head_sha: pr.head.sha,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutoMergeData {
    repository: AutoMergeRepository,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutoMergeRepository {
    auto_merge_allowed: bool,
}

/// Github REST and GraphQL client scoped to one repository.
pub struct GithubClient {
    client: reqwest::blocking::Client,
    token: String,
    api_url: Url,
    graphql_url: Url,
    repo: RepoSlug,
}

impl GithubClient {
    /// # Errors
    ///
    /// Returns [`GithubError::InvalidUrl`] if an endpoint is not an absolute URL
    /// and [`GithubError::ClientInit`] if the HTTP client cannot be initialized.
    ///
    /// # Panics
    ///
    /// This method panics if called from within an async runtime. See docs on
    /// [`reqwest::blocking`] for details.
    pub fn new(
        token: impl Into<String>,
        repo: RepoSlug,
        api_url: &str,
        graphql_url: &str,
    ) -> Result<Self, GithubError> {
        let parse = |url: &str| Url::parse(url).map_err(|_| GithubError::InvalidUrl(url.to_string()));
        let api_url = parse(api_url)?;
        let graphql_url = parse(graphql_url)?;
        if api_url.cannot_be_a_base() {
            return Err(GithubError::InvalidUrl(api_url.to_string()));
        }

        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(GithubError::ClientInit)?;

        Ok(Self {
            client,
            token: token.into(),
            api_url,
            graphql_url,
            repo,
        })
    }

    #[must_use]
    pub fn repo(&self) -> &RepoSlug {
        &self.repo
    }

    /// `{api}/repos/{owner}/{name}/{segments...}`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, GithubError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| GithubError::InvalidUrl(self.api_url.to_string()))?
            .pop_if_empty()
            .extend(["repos", self.repo.owner.as_str(), self.repo.name.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    fn send(&self, request: RequestBuilder, url: &Url) -> Result<Response, GithubError> {
        debug!("Github API request: {url}");
        self.authorized(request)
            .send()
            .map_err(|source| GithubError::Request {
                url: url.to_string(),
                source,
            })
    }

    /// Send and return the response, or `None` on 404.
    fn send_optional(
        &self,
        request: RequestBuilder,
        url: &Url,
    ) -> Result<Option<Response>, GithubError> {
        let response = self.send(request, url)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        ensure_success(response, url).map(Some)
    }

    fn send_checked(&self, request: RequestBuilder, url: &Url) -> Result<Response, GithubError> {
        let response = self.send(request, url)?;
        ensure_success(response, url)
    }

    fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, GithubError> {
        let url = &self.graphql_url;
        let request = self
            .client
            .post(url.clone())
            .json(&json!({ "query": query, "variables": variables }));

        let response: GraphQlResponse<T> = parse_json(self.send_checked(request, url)?, url)?;

        if !response.errors.is_empty() {
            let messages: Vec<_> = response.errors.into_iter().map(|e| e.message).collect();
            return Err(GithubError::GraphQl(messages.join("; ")));
        }
        response
            .data
            .ok_or_else(|| GithubError::GraphQl("response has no data".to_string()))
    }

    /// Head commit of `branch`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub fn get_branch_sha(&self, branch: &str) -> Result<Option<String>, GithubError> {
        let url = self.endpoint(&["branches", branch])?;
        match self.send_optional(self.client.get(url.clone()), &url)? {
            Some(response) => {
                let branch: BranchResponse = parse_json(response, &url)?;
                Ok(Some(branch.commit.sha))
            }
            None => Ok(None),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the ref cannot be created.
    pub fn post_ref(&self, branch: &str, sha: &str) -> Result<(), GithubError> {
        let url = self.endpoint(&["git", "refs"])?;
        let request = self
            .client
            .post(url.clone())
            .json(&json!({ "ref": format!("refs/heads/{branch}"), "sha": sha }));
        self.send_checked(request, &url)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the ref cannot be deleted.
    pub fn delete_ref(&self, branch: &str) -> Result<(), GithubError> {
        let mut segments = vec!["git", "refs", "heads"];
        segments.extend(branch.split('/'));
        let url = self.endpoint(&segments)?;
        self.send_checked(self.client.delete(url.clone()), &url)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub fn list_open_pulls(&self, head: &str, base: &str) -> Result<Vec<PullRequest>, GithubError> {
        let mut url = self.endpoint(&["pulls"])?;
        url.query_pairs_mut()
            .append_pair("state", "open")
            .append_pair("head", &format!("{}:{head}", self.repo.owner))
            .append_pair("base", base);

        let pulls: Vec<PullResponse> = parse_json(self.send_checked(self.client.get(url.clone()), &url)?, &url)?;
        Ok(pulls.into_iter().map(PullRequest::from).collect())
    }

    /// # Errors
    ///
    /// Returns an error if the pull request cannot be created.
    pub fn post_pull(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, GithubError> {
        let url = self.endpoint(&["pulls"])?;
        let request = self.client.post(url.clone()).json(&json!({
            "title": title,
            "head": head,
            "base": base,
            "body": body,
        }));
        let pull: PullResponse = parse_json(self.send_checked(request, &url)?, &url)?;
        Ok(pull.into())
    }

    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub fn has_label(&self, name: &str) -> Result<bool, GithubError> {
        let url = self.endpoint(&["labels", name])?;
        Ok(self.send_optional(self.client.get(url.clone()), &url)?.is_some())
    }

    /// # Errors
    ///
    /// Returns an error if the label cannot be created.
    pub fn post_label(&self, name: &str, color: &str, description: &str) -> Result<(), GithubError> {
        let url = self.endpoint(&["labels"])?;
        let request = self.client.post(url.clone()).json(&json!({
            "name": name,
            "color": color,
            "description": description,
        }));
        self.send_checked(request, &url)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the labels cannot be attached.
    pub fn post_issue_labels(&self, number: u64, labels: &[String]) -> Result<(), GithubError> {
        let number = number.to_string();
        let url = self.endpoint(&["issues", &number, "labels"])?;
        let request = self.client.post(url.clone()).json(&json!({ "labels": labels }));
        self.send_checked(request, &url)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn query_auto_merge_allowed(&self) -> Result<bool, GithubError> {
        let data: AutoMergeData = self.graphql(
            AUTO_MERGE_ALLOWED_QUERY,
            json!({ "owner": self.repo.owner, "name": self.repo.name }),
        )?;
        Ok(data.repository.auto_merge_allowed)
    }

    /// # Errors
    ///
    /// Returns an error if the mutation fails.
    pub fn mutate_enable_auto_merge(
        &self,
        pr: &PullRequest,
        method: MergeMethod,
    ) -> Result<(), GithubError> {
        let _: Value = self.graphql(
            ENABLE_AUTO_MERGE_MUTATION,
            json!({
                "id": pr.node_id,
                "method": method.as_graphql(),
                "oid": pr.head_sha,
            }),
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the pull request cannot be merged.
    pub fn put_merge(&self, pr: &PullRequest, method: MergeMethod) -> Result<(), GithubError> {
        let number = pr.number.to_string();
        let url = self.endpoint(&["pulls", &number, "merge"])?;
        let request = self.client.put(url.clone()).json(&json!({
            "merge_method": method.as_rest(),
            "sha": pr.head_sha,
        }));
        self.send_checked(request, &url)?;
        Ok(())
    }

    /// Ask for the head branch of `pr` to be deleted once it is merged.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull request cannot be updated.
    pub fn patch_pull_delete_branch(&self, pr: &PullRequest) -> Result<(), GithubError> {
        let (url, request) = self.pull_delete_branch_request(pr)?;
        self.send_checked(request, &url)?;
        Ok(())
    }

    fn pull_delete_branch_request(&self, pr: &PullRequest) -> Result<(Url, RequestBuilder), GithubError> {
        let number = pr.number.to_string();
        let url = self.endpoint(&["pulls", &number])?;
        let request = self
            .client
            .patch(url.clone())
            .json(&json!({ "delete_branch_on_merge": true }));
        Ok((url, request))
    }
}

fn ensure_success(response: Response, url: &Url) -> Result<Response, GithubError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<Value>()
        .ok()
        .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();

    Err(GithubError::ApiStatus {
        status,
        url: url.to_string(),
        message,
    })
}

fn parse_json<T: DeserializeOwned>(response: Response, url: &Url) -> Result<T, GithubError> {
    response.json().map_err(|source| GithubError::ParseResponse {
        url: url.to_string(),
        source,
    })
}

impl Forge for GithubClient {
    fn branch_sha(&self, branch: &str) -> Result<Option<String>, ForgeError> {
        self.get_branch_sha(branch)
            .map_err(|e| e.into_forge("get branch"))
    }

    fn create_branch(&self, branch: &str, sha: &str) -> Result<(), ForgeError> {
        self.post_ref(branch, sha)
            .map_err(|e| e.into_forge("create branch"))
    }

    fn delete_branch(&self, branch: &str) -> Result<(), ForgeError> {
        self.delete_ref(branch)
            .map_err(|e| e.into_forge("delete branch"))
    }

    fn open_pull_requests(&self, head: &str, base: &str) -> Result<Vec<PullRequest>, ForgeError> {
        self.list_open_pulls(head, base)
            .map_err(|e| e.into_forge("list pull requests"))
    }

    fn create_pull_request(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, ForgeError> {
        self.post_pull(head, base, title, body)
            .map_err(|e| e.into_forge("create pull request"))
    }

    fn label_exists(&self, name: &str) -> Result<bool, ForgeError> {
        self.has_label(name).map_err(|e| e.into_forge("get label"))
    }

    fn create_label(&self, name: &str, color: &str, description: &str) -> Result<(), ForgeError> {
        self.post_label(name, color, description)
            .map_err(|e| e.into_forge("create label"))
    }

    fn add_labels(&self, number: u64, labels: &[String]) -> Result<(), ForgeError> {
        self.post_issue_labels(number, labels)
            .map_err(|e| e.into_forge("add labels"))
    }

    fn auto_merge_allowed(&self) -> Result<bool, ForgeError> {
        self.query_auto_merge_allowed()
            .map_err(|e| e.into_forge("query auto-merge setting"))
    }

    fn enable_auto_merge(&self, pr: &PullRequest, method: MergeMethod) -> Result<(), ForgeError> {
        self.mutate_enable_auto_merge(pr, method)
            .map_err(|e| e.into_forge("enable auto-merge"))
    }

    fn merge_pull_request(&self, pr: &PullRequest, method: MergeMethod) -> Result<(), ForgeError> {
        self.put_merge(pr, method)
            .map_err(|e| e.into_forge("merge pull request"))
    }

    fn enable_delete_branch_on_merge(&self, pr: &PullRequest) -> Result<(), ForgeError> {
        self.patch_pull_delete_branch(pr)
            .map_err(|e| e.into_forge("enable delete branch on merge"))
    }
}
