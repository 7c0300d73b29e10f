//! REST gateway client.
//!
//! Implements [`GatewayClient`] against the Discord-style REST API. Occupancy
//! is answered from the shared [`VoiceStateTracker`] because the REST API has
//! no occupancy query.
//!
//! # Status Mapping
//!
//! | Status | Error |
//! |--------|-------|
//! | 401, 403 | `PermissionDenied` |
//! | 404 | `NotFound` |
//! | 409 | `Conflict` |
//! | 429 | `RateLimited` (body `retry_after` seconds, else `Retry-After` header) |
//! | other | `Transient` |

use super::{CreateRoom, GatewayClient, GroupInfo, RoomInfo, VoiceStateTracker};
use crate::errors::RcError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::{GroupId, MemberId, RoomId, TenantId};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Connect timeout for gateway requests in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Wait used when a 429 carries no parsable retry hint.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Channel type of a voice room.
const CHANNEL_TYPE_VOICE: u8 = 2;

/// Channel type of a group (category).
const CHANNEL_TYPE_GROUP: u8 = 4;

/// Permission overwrite target type for a member.
const OVERWRITE_TYPE_MEMBER: u8 = 1;

/// `MANAGE_CHANNELS` permission bit, granted to room owners.
const PERMISSION_MANAGE_CHANNELS: u64 = 1 << 4;

#[derive(Debug, Deserialize)]
struct ChannelPayload {
    id: RoomId,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    name: String,
    #[serde(default)]
    parent_id: Option<GroupId>,
}

#[derive(Debug, Serialize)]
struct PermissionOverwrite {
    id: MemberId,
    #[serde(rename = "type")]
    kind: u8,
    allow: String,
    deny: String,
}

#[derive(Debug, Serialize)]
struct CreateChannelBody<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<GroupId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    permission_overwrites: Vec<PermissionOverwrite>,
}

#[derive(Debug, Serialize)]
struct MoveMemberBody {
    channel_id: RoomId,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

/// REST implementation of [`GatewayClient`].
#[derive(Clone)]
pub struct RestGatewayClient {
    /// HTTP client with configured timeouts.
    client: Client,
    /// API base URL without trailing slash.
    base_url: String,
    /// Bot credential.
    token: SecretString,
    /// Occupancy view fed by voice-state events.
    voice_states: Arc<VoiceStateTracker>,
}

impl RestGatewayClient {
    /// Create a new REST gateway client.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Config` if the HTTP client cannot be built.
    pub fn new(
        base_url: String,
        token: SecretString,
        timeout: Duration,
        voice_states: Arc<VoiceStateTracker>,
    ) -> Result<Self, RcError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "rc.gateway.http", error = %e, "Failed to build HTTP client");
                RcError::Config(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            voice_states,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .header(
                "Authorization",
                format!("Bot {}", self.token.expose_secret()),
            )
    }

    async fn send(&self, operation: &'static str, builder: RequestBuilder) -> Result<Response, RcError> {
        let response = builder.send().await.map_err(|e| {
            warn!(target: "rc.gateway.http", operation, error = %e, "Gateway request failed");
            RcError::Transient(format!("{operation}: request failed: {e}"))
        })?;
        check_status(operation, response).await
    }

    async fn list_channels(&self, tenant: TenantId) -> Result<Vec<ChannelPayload>, RcError> {
        let response = self
            .send(
                "list_channels",
                self.request(Method::GET, &format!("/guilds/{tenant}/channels")),
            )
            .await?;
        response.json().await.map_err(|e| {
            error!(target: "rc.gateway.http", error = %e, "Failed to parse channel list");
            RcError::Transient(format!("list_channels: invalid response: {e}"))
        })
    }

    async fn create_channel(
        &self,
        operation: &'static str,
        tenant: TenantId,
        body: &CreateChannelBody<'_>,
    ) -> Result<ChannelPayload, RcError> {
        let response = self
            .send(
                operation,
                self.request(Method::POST, &format!("/guilds/{tenant}/channels"))
                    .json(body),
            )
            .await?;
        response.json().await.map_err(|e| {
            error!(target: "rc.gateway.http", operation, error = %e, "Failed to parse created channel");
            RcError::Transient(format!("{operation}: invalid response: {e}"))
        })
    }
}

/// Map a non-success status to the error taxonomy.
async fn check_status(operation: &'static str, response: Response) -> Result<Response, RcError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = retry_after(response).await;
            warn!(
                target: "rc.gateway.http",
                operation,
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                "Gateway rate limited request"
            );
            Err(RcError::RateLimited { retry_after })
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            warn!(target: "rc.gateway.http", operation, status = %status, "Gateway denied request");
            Err(RcError::PermissionDenied(format!("{operation}: {status}")))
        }
        StatusCode::NOT_FOUND => Err(RcError::NotFound(format!("{operation}: {status}"))),
        StatusCode::CONFLICT => Err(RcError::Conflict(format!("{operation}: {status}"))),
        _ => {
            warn!(target: "rc.gateway.http", operation, status = %status, "Unexpected gateway response");
            Err(RcError::Transient(format!("{operation}: {status}")))
        }
    }
}

/// Extract the server-specified wait from a 429 response.
async fn retry_after(response: Response) -> Duration {
    let header = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok());

    let body = response
        .json::<RateLimitBody>()
        .await
        .ok()
        .map(|b| b.retry_after);

    // Out-of-range values (negative, NaN, or beyond `Duration`) get the default
    body.or(header)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

#[async_trait]
impl GatewayClient for RestGatewayClient {
    #[instrument(skip(self), fields(tenant_id = %tenant))]
    async fn list_groups(&self, tenant: TenantId) -> Result<Vec<GroupInfo>, RcError> {
        Ok(self
            .list_channels(tenant)
            .await?
            .into_iter()
            .filter(|c| c.kind == CHANNEL_TYPE_GROUP)
            .map(|c| GroupInfo {
                id: GroupId(c.id.get()),
                name: c.name,
            })
            .collect())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant))]
    async fn list_rooms(&self, tenant: TenantId) -> Result<Vec<RoomInfo>, RcError> {
        Ok(self
            .list_channels(tenant)
            .await?
            .into_iter()
            .filter(|c| c.kind == CHANNEL_TYPE_VOICE)
            .map(|c| RoomInfo {
                id: c.id,
                tenant,
                name: c.name,
                group: c.parent_id,
            })
            .collect())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant))]
    async fn create_group(&self, tenant: TenantId, name: &str) -> Result<GroupInfo, RcError> {
        let body = CreateChannelBody {
            name,
            kind: CHANNEL_TYPE_GROUP,
            parent_id: None,
            permission_overwrites: Vec::new(),
        };
        let created = self.create_channel("create_group", tenant, &body).await?;
        debug!(target: "rc.gateway.http", group_id = %created.id, "Group created");
        Ok(GroupInfo {
            id: GroupId(created.id.get()),
            name: created.name,
        })
    }

    #[instrument(skip_all, fields(tenant_id = %request.tenant))]
    async fn create_room(&self, request: &CreateRoom) -> Result<RoomInfo, RcError> {
        let permission_overwrites = request
            .owner
            .map(|owner| PermissionOverwrite {
                id: owner,
                kind: OVERWRITE_TYPE_MEMBER,
                allow: PERMISSION_MANAGE_CHANNELS.to_string(),
                deny: "0".to_string(),
            })
            .into_iter()
            .collect();
        let body = CreateChannelBody {
            name: &request.name,
            kind: CHANNEL_TYPE_VOICE,
            parent_id: request.group,
            permission_overwrites,
        };
        let created = self
            .create_channel("create_room", request.tenant, &body)
            .await?;
        debug!(target: "rc.gateway.http", room_id = %created.id, "Room created");
        Ok(RoomInfo {
            id: created.id,
            tenant: request.tenant,
            name: created.name,
            group: created.parent_id,
        })
    }

    #[instrument(skip(self), fields(room_id = %room))]
    async fn delete_room(&self, room: RoomId) -> Result<(), RcError> {
        self.send(
            "delete_room",
            self.request(Method::DELETE, &format!("/channels/{room}")),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant, member_id = %member, room_id = %room))]
    async fn move_member(
        &self,
        tenant: TenantId,
        member: MemberId,
        room: RoomId,
    ) -> Result<(), RcError> {
        self.send(
            "move_member",
            self.request(Method::PATCH, &format!("/guilds/{tenant}/members/{member}"))
                .json(&MoveMemberBody { channel_id: room }),
        )
        .await?;
        Ok(())
    }

    async fn list_occupants(
        &self,
        tenant: TenantId,
        room: RoomId,
    ) -> Result<Vec<MemberId>, RcError> {
        Ok(self.voice_states.occupants(tenant, room))
    }
}
