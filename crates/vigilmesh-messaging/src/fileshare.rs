//! File-share protocols: metadata gossip and rights-gated download
//!
//! A TL announcement hashes the file, records it in the file book,
//! starts providing its cid on content routing and hands the signed
//! metadata to the spreader. Downloads walk the provider list in
//! descending reliability, verify the returned bytes against the cid
//! and report providers that serve corrupt data.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use vigilmesh_books::{FileBook, FileMeta, Severity};
use vigilmesh_net::{read_message, write_message, ContentRouting, P2pStream};
use vigilmesh_protocol::{
    protocols, ContentId, FileDownloadRequest, FileDownloadResponse, FileMetadata, OrgId, PeerId,
    WireMessage,
};

use crate::core::{payload_to_value, value_to_payload, PeerDescriptor, ProtoCore};
use crate::bus::{parse_tl, TlHandler};
use crate::error::{MessagingError, Result};
use crate::registry::StreamHandler;
use crate::spreader::Spreader;

const STATUS_OK: &str = "OK";

#[derive(Deserialize)]
struct TlAnnouncement {
    expired_at: i64,
    description: Value,
    severity: String,
    path: String,
    rights: Vec<String>,
}

#[derive(Deserialize)]
struct TlDownloadRequest {
    file_id: String,
}

#[derive(Serialize)]
struct MetadataNotification {
    file_id: String,
    severity: String,
    sender: PeerDescriptor,
    description: Value,
}

#[derive(Serialize)]
struct DownloadedNotification {
    file_id: String,
    path: String,
    sender: PeerDescriptor,
}

pub struct FileShareProtocol {
    core: Arc<ProtoCore>,
    files: Arc<FileBook>,
    dht: Arc<dyn ContentRouting>,
    spreader: Arc<Spreader>,
    download_dir: PathBuf,
}

impl FileShareProtocol {
    pub fn new(
        core: Arc<ProtoCore>,
        files: Arc<FileBook>,
        dht: Arc<dyn ContentRouting>,
        spreader: Arc<Spreader>,
        download_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(FileShareProtocol {
            core,
            files,
            dht,
            spreader,
            download_dir,
        })
    }

    fn parse_rights(raw: &[String]) -> Result<Vec<OrgId>> {
        raw.iter()
            .map(|r| {
                OrgId::from_hex(r)
                    .map_err(|_| MessagingError::Other(format!("invalid org id '{r}'")))
            })
            .collect()
    }

    /// TL announces a local file to share.
    async fn announce(&self, announcement: TlAnnouncement) -> Result<()> {
        let severity = Severity::parse(&announcement.severity)?;
        let rights = Self::parse_rights(&announcement.rights)?;

        let data = tokio::fs::read(&announcement.path).await?;
        let cid = ContentId::for_bytes(&data);

        self.files
            .add(
                cid,
                FileMeta {
                    expired_at: announcement.expired_at,
                    available: true,
                    path: announcement.path.clone(),
                    rights: rights.clone(),
                    severity,
                    description: announcement.description.clone(),
                },
            )
            .await?;

        self.dht.start_providing(cid).await?;
        debug!(cid = %cid, "started providing shared file");

        let mut metadata = FileMetadata {
            meta: self.core.new_meta(),
            cid: cid.to_hex(),
            description: value_to_payload(&announcement.description)?,
            rights: announcement.rights.clone(),
            severity: severity.as_str().to_string(),
            expired_at: announcement.expired_at,
        };
        self.core.crypto.sign_message(&mut metadata);

        // Our own gossip may come back; never reprocess it.
        self.core
            .seen
            .mark_seen(&metadata.meta.id, self.core.local_peer())
            .await;

        self.spreader.start(
            protocols::FILE_SHARE_METADATA,
            severity,
            rights,
            metadata.encode(),
            self.core.local_peer(),
        );
        Ok(())
    }

    /// Gossiped metadata from the overlay.
    async fn on_metadata(&self, remote: PeerId, mut stream: P2pStream) -> Result<()> {
        let bytes = read_message(&mut stream).await?;
        let metadata = FileMetadata::decode(&bytes)?;

        if !self.core.seen.mark_seen(&metadata.meta.id, remote).await {
            debug!(forwarder = %remote, "dropping already seen file metadata");
            return Ok(());
        }

        self.core.crypto.authenticate(&metadata)?;
        info!(
            author = %metadata.meta.original_sender.peer_id,
            forwarder = %remote,
            "received file metadata"
        );

        let severity = Severity::parse(&metadata.severity)?;
        let rights = Self::parse_rights(&metadata.rights)?;
        let cid = ContentId::from_hex(&metadata.cid)?;
        let description = payload_to_value(&metadata.description)?;

        self.files
            .add(
                cid,
                FileMeta {
                    expired_at: metadata.expired_at,
                    available: false,
                    path: String::new(),
                    rights: rights.clone(),
                    severity,
                    description: description.clone(),
                },
            )
            .await?;

        let notification = MetadataNotification {
            file_id: metadata.cid.clone(),
            severity: severity.as_str().to_string(),
            sender: self
                .core
                .peer_descriptor(&metadata.meta.original_sender.peer_id)
                .await,
            description,
        };
        self.core
            .publish_tl("nl2tl_file_share_received_metadata", &notification)
            .await?;

        self.spreader.start(
            protocols::FILE_SHARE_METADATA,
            severity,
            rights,
            metadata.encode(),
            remote,
        );
        Ok(())
    }

    /// TL wants the bytes of an announced file.
    async fn download(&self, request: TlDownloadRequest) -> Result<()> {
        let cid = ContentId::from_hex(&request.file_id)?;
        let meta = self
            .files
            .get(&cid)
            .await
            .ok_or_else(|| MessagingError::Other(format!("no metadata for file {cid}")))?;
        if meta.available && !meta.path.is_empty() {
            warn!(cid = %cid, path = %meta.path, "file is already available locally");
            return Ok(());
        }

        let providers = self.dht.providers_of(cid).await?;
        if providers.is_empty() {
            return Err(MessagingError::Other(format!(
                "found no providers of {cid}"
            )));
        }
        let providers = self.core.selector.sort_by_reliability(providers).await;

        let mut request_msg = FileDownloadRequest {
            meta: self.core.new_meta(),
            cid: cid.to_hex(),
        };
        self.core.crypto.sign_message(&mut request_msg);
        let request_bytes = request_msg.encode();

        for provider in providers {
            match self.try_provider(provider, &request_bytes, cid).await {
                Ok(path) => {
                    let notification = DownloadedNotification {
                        file_id: cid.to_hex(),
                        path: path.clone(),
                        sender: self.core.peer_descriptor(&provider).await,
                    };
                    self.core
                        .publish_tl("nl2tl_file_share_downloaded", &notification)
                        .await?;

                    self.files.mark_available(&cid, path).await?;
                    self.dht.start_providing(cid).await?;
                    info!(cid = %cid, provider = %provider, "file downloaded");
                    return Ok(());
                }
                Err(e) => {
                    warn!(provider = %provider, error = %e, "provider failed, trying next");
                }
            }
        }
        Err(MessagingError::Other(format!(
            "all providers of {cid} failed"
        )))
    }

    /// One provider attempt: request, read, authenticate, verify the
    /// hash, persist.
    async fn try_provider(
        &self,
        provider: PeerId,
        request_bytes: &[u8],
        cid: ContentId,
    ) -> Result<String> {
        debug!(provider = %provider, cid = %cid, "trying file provider");

        let mut stream = self
            .core
            .host
            .open_stream(provider, protocols::FILE_SHARE_DOWNLOAD)
            .await?;
        write_message(&mut stream, request_bytes).await?;

        let bytes = read_message(&mut stream).await?;
        let response = FileDownloadResponse::decode(&bytes)?;
        self.core.crypto.authenticate(&response)?;

        if response.data.is_empty() {
            return Err(MessagingError::EmptyDownload);
        }
        if ContentId::for_bytes(&response.data) != cid {
            self.core
                .report_peer(&provider, "provided file with not matching hash")
                .await;
            return Err(MessagingError::HashMismatch);
        }

        let path = self.download_dir.join(cid.to_hex());
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(&response.data).await?;
        file.flush().await?;

        Ok(path.to_string_lossy().into_owned())
    }

    /// Serve a download request if the requester is authorised.
    async fn on_download(&self, remote: PeerId, mut stream: P2pStream) -> Result<()> {
        let bytes = read_message(&mut stream).await?;
        let request = FileDownloadRequest::decode(&bytes)?;
        self.core.crypto.authenticate(&request)?;
        debug!(remote = %remote, cid = %request.cid, "received download request");

        let cid = ContentId::from_hex(&request.cid)?;
        let meta = self
            .files
            .get(&cid)
            .await
            .ok_or_else(|| MessagingError::Other(format!("unknown cid {cid}")))?;
        if !meta.available || meta.path.is_empty() {
            return Err(MessagingError::Other(format!(
                "file {cid} is not available locally"
            )));
        }

        if !meta.rights.is_empty()
            && !self.core.orgs.has_peer_right(&remote, &meta.rights).await
        {
            // Unauthorised: drop without data so nothing leaks.
            warn!(remote = %remote, cid = %cid, "peer has no right to download file");
            return Ok(());
        }

        let data = tokio::fs::read(&meta.path).await?;
        let mut response = FileDownloadResponse {
            meta: self.core.new_meta(),
            status: STATUS_OK.to_string(),
            data,
        };
        self.core.crypto.sign_message(&mut response);

        write_message(&mut stream, &response.encode()).await?;
        info!(remote = %remote, cid = %cid, "served file download");
        Ok(())
    }
}

#[async_trait]
impl StreamHandler for FileShareProtocol {
    async fn handle_stream(&self, protocol: &str, remote: PeerId, stream: P2pStream) {
        let result = match protocol {
            protocols::FILE_SHARE_METADATA => self.on_metadata(remote, stream).await,
            _ => self.on_download(remote, stream).await,
        };
        if let Err(e) = result {
            warn!(remote = %remote, protocol, error = %e, "file share handler failed");
        }
    }
}

#[async_trait]
impl TlHandler for FileShareProtocol {
    async fn on_tl(&self, msg_type: String, data: Value) {
        let result = match msg_type.as_str() {
            "tl2nl_file_share" => match parse_tl::<TlAnnouncement>(data) {
                Ok(announcement) => self.announce(announcement).await,
                Err(e) => {
                    error!(error = %e, "malformed TL file announcement");
                    return;
                }
            },
            _ => match parse_tl::<TlDownloadRequest>(data) {
                Ok(request) => self.download(request).await,
                Err(e) => {
                    error!(error = %e, "malformed TL download request");
                    return;
                }
            },
        };
        if let Err(e) = result {
            error!(msg_type = %msg_type, error = %e, "file share TL handling failed");
        }
    }
}
