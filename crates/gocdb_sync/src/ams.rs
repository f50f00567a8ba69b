// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client for the parts of the AMS messaging API used to provision users and
//! topic ACLs.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use http_client::{BaseApiClient, HttpError};

#[derive(Debug, thiserror::Error)]
pub enum AmsError {
    #[error("creating AMS user {name}: {source}")]
    CreateUser { name: String, source: HttpError },
    #[error("fetching AMS user {name}: {source}")]
    FetchUser { name: String, source: HttpError },
    #[error("deleting AMS user {name}: {source}")]
    DeleteUser { name: String, source: HttpError },
    #[error("creating topic {topic}: {source}")]
    CreateTopic { topic: String, source: HttpError },
    #[error("fetching ACL of topic {topic}: {source}")]
    FetchAcl { topic: String, source: HttpError },
    #[error("modifying ACL of topic {topic}: {source}")]
    ModifyAcl { topic: String, source: HttpError },
}

impl AmsError {
    fn source_http(&self) -> &HttpError {
        match self {
            AmsError::CreateUser { source, .. }
            | AmsError::FetchUser { source, .. }
            | AmsError::DeleteUser { source, .. }
            | AmsError::CreateTopic { source, .. }
            | AmsError::FetchAcl { source, .. }
            | AmsError::ModifyAcl { source, .. } => source,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.source_http().status()
    }

    pub fn is_not_found(&self) -> bool {
        self.source_http().is_not_found()
    }
}

#[derive(Debug, Serialize)]
struct ProjectRoles<'a> {
    project: &'a str,
    roles: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct NewUser<'a> {
    projects: [ProjectRoles<'a>; 1],
    email: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AmsUser {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserOutcome {
    Created,
    Existing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicOutcome {
    Created,
    Existing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicAcl {
    #[serde(default)]
    pub authorized_users: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AmsClient {
    http: BaseApiClient,
    host: String,
    project: String,
    token: String,
}

impl AmsClient {
    pub fn new(
        http: BaseApiClient,
        host: impl Into<String>,
        project: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            host: host.into(),
            project: project.into(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("https://{}/v1/{path}?key={}", self.host, self.token)
    }

    fn topic_url(&self, topic: &str, action: &str) -> String {
        self.url(&format!("projects/{}/topics/{topic}{action}", self.project))
    }

    /// Creates a user with one role in the configured project. If the user
    /// already exists it is fetched instead.
    pub async fn ensure_user(
        &self,
        name: &str,
        email: &str,
        role: &str,
    ) -> Result<(AmsUser, UserOutcome), AmsError> {
        let url = self.url(&format!("users/{name}"));
        let body = NewUser {
            projects: [ProjectRoles {
                project: &self.project,
                roles: [role],
            }],
            email,
        };
        match self.http.json_json_post::<_, AmsUser>(&url, &body).await {
            Ok(user) => {
                info!(user = %name, uuid = %user.uuid, "created AMS user");
                Ok((user, UserOutcome::Created))
            }
            Err(err) if err.is_conflict() => {
                debug!(user = %name, "AMS user exists, fetching it");
                let user = self
                    .http
                    .json_get::<AmsUser>(&url)
                    .await
                    .map_err(|source| AmsError::FetchUser {
                        name: name.to_owned(),
                        source,
                    })?;
                Ok((user, UserOutcome::Existing))
            }
            Err(source) => Err(AmsError::CreateUser {
                name: name.to_owned(),
                source,
            }),
        }
    }

    pub async fn delete_user(&self, name: &str) -> Result<(), AmsError> {
        self.http
            .delete(&self.url(&format!("users/{name}")))
            .await
            .map_err(|source| AmsError::DeleteUser {
                name: name.to_owned(),
                source,
            })
    }

    /// Creates a topic, treating an existing one as success.
    pub async fn ensure_topic(&self, topic: &str) -> Result<TopicOutcome, AmsError> {
        match self.http.empty_empty_put(&self.topic_url(topic, "")).await {
            Ok(()) => {
                info!(%topic, "created topic");
                Ok(TopicOutcome::Created)
            }
            Err(err) if err.is_conflict() => Ok(TopicOutcome::Existing),
            Err(source) => Err(AmsError::CreateTopic {
                topic: topic.to_owned(),
                source,
            }),
        }
    }

    pub async fn topic_acl(&self, topic: &str) -> Result<Vec<String>, AmsError> {
        self.http
            .json_get::<TopicAcl>(&self.topic_url(topic, ":acl"))
            .await
            .map(|acl| acl.authorized_users)
            .map_err(|source| AmsError::FetchAcl {
                topic: topic.to_owned(),
                source,
            })
    }

    /// Replaces the topic's ACL with `users`.
    pub async fn modify_topic_acl(&self, topic: &str, users: &[String]) -> Result<(), AmsError> {
        let body = TopicAcl {
            authorized_users: users.to_vec(),
        };
        self.http
            .json_empty_post(&self.topic_url(topic, ":modifyAcl"), &body)
            .await
            .map_err(|source| AmsError::ModifyAcl {
                topic: topic.to_owned(),
                source,
            })
    }
}

/// `existing` followed by the members of `new` it lacks, without duplicates.
pub fn union_acl(existing: &[String], new: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(existing.len() + new.len());
    for user in existing.iter().chain(new) {
        if !out.contains(user) {
            out.push(user.clone());
        }
    }
    out
}
