use crate::deletion::DeleteQueue;
use crate::error::{storage_to_shortener_error, Result, ShortenerError};
use snip_core::{Deadline, DeleteTask, Storage, StorageError};
use snip_identity::IdentityService;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Budget for a single storage call made on behalf of a request.
pub const STORAGE_BUDGET: Duration = Duration::from_secs(3);
pub const PING_BUDGET: Duration = Duration::from_secs(1);
/// Largest number of codes accepted by one delete request.
pub const MAX_DELETE_CODES: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortened {
    pub short_url: String,
    /// The URL was already stored; `short_url` points at the existing record.
    pub conflict: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub correlation_id: String,
    pub original_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub correlation_id: String,
    pub short_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserUrl {
    pub short_url: String,
    pub original_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub urls: usize,
    pub users: usize,
}

/// Request-level operations over a storage backend, the identity service and
/// the deletion queue.
///
/// Dropping the service drops its queue handle, which lets the flush loop
/// drain and stop once no other handle is alive.
pub struct ShortenerService {
    storage: Arc<dyn Storage>,
    identity: Arc<IdentityService>,
    queue: DeleteQueue,
    base_url: String,
}

impl ShortenerService {
    /// `base_url` prefixes every returned short URL. A missing scheme defaults to `http`.
    pub fn new(
        storage: Arc<dyn Storage>,
        identity: Arc<IdentityService>,
        queue: DeleteQueue,
        base_url: &str,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url)?;
        info!(
            base_url = %base_url,
            storage = storage.instance_name(),
            "shortener service ready"
        );
        Ok(Self {
            storage,
            identity,
            queue,
            base_url,
        })
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn identity(&self) -> &Arc<IdentityService> {
        &self.identity
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn short_url(&self, short_code: &str) -> String {
        format!("{}/{}", self.base_url, short_code)
    }

    fn deadline() -> Deadline {
        Deadline::after(STORAGE_BUDGET)
    }

    pub async fn write_url(&self, raw_url: &str, user_id: i64) -> Result<Shortened> {
        let original_url = clean_url(raw_url).map_err(ShortenerError::InvalidUrl)?;

        let outcome = self
            .storage
            .write_url(Self::deadline(), &original_url, user_id)
            .await
            .map_err(storage_to_shortener_error)?;

        Ok(Shortened {
            short_url: self.short_url(&outcome.short_code),
            conflict: outcome.conflict,
        })
    }

    /// Shortens every item or none. Output follows input order.
    pub async fn shorten_batch(
        &self,
        items: Vec<BatchItem>,
        user_id: i64,
    ) -> Result<Vec<BatchResult>> {
        if items.is_empty() {
            return Err(ShortenerError::BadRequest("batch is empty".to_string()));
        }

        let mut cleaned = Vec::with_capacity(items.len());
        let mut wrong = Vec::new();
        for (pos, item) in items.iter().enumerate() {
            match clean_url(&item.original_url) {
                Ok(url) => cleaned.push(url),
                Err(reason) => wrong.push(format!(
                    "pos: {pos}, correlation_id: \"{}\", original_url: \"{}\", error: \"{reason}\"",
                    item.correlation_id, item.original_url
                )),
            }
        }
        if !wrong.is_empty() {
            return Err(ShortenerError::BadRequest(format!(
                "wrong batch items: {}",
                wrong.join(", ")
            )));
        }

        let started = tokio::time::Instant::now();
        let records = self
            .storage
            .write_urls(Self::deadline(), &cleaned, user_id)
            .await
            .map_err(storage_to_shortener_error)?;
        debug!(
            items = items.len(),
            elapsed = ?started.elapsed(),
            "batch shortened"
        );

        items
            .into_iter()
            .zip(cleaned)
            .map(|(item, url)| {
                let record = records.get(&url).ok_or_else(|| {
                    ShortenerError::Storage(format!("batch result is missing '{url}'"))
                })?;
                Ok(BatchResult {
                    correlation_id: item.correlation_id,
                    short_url: self.short_url(&record.short_code),
                })
            })
            .collect()
    }

    pub async fn read_url(&self, short_code: &str) -> Result<String> {
        let short_code = short_code.trim();
        if short_code.is_empty() {
            return Err(ShortenerError::BadRequest("short code is empty".to_string()));
        }

        self.storage
            .read_url(Self::deadline(), short_code)
            .await
            .map_err(storage_to_shortener_error)
    }

    /// Everything `user_id` ever shortened, deleted entries included.
    pub async fn user_urls(&self, user_id: i64) -> Result<Vec<UserUrl>> {
        let records = match self.storage.user_urls(Self::deadline(), user_id).await {
            Ok(records) => records,
            Err(StorageError::NotFound(message)) => return Err(ShortenerError::NoContent(message)),
            Err(err) => return Err(storage_to_shortener_error(err)),
        };

        Ok(records
            .into_iter()
            .map(|record| UserUrl {
                short_url: self.short_url(&record.short_code),
                original_url: record.original_url,
            })
            .collect())
    }

    /// Validates the request and queues it. The codes become `Gone` after the
    /// next successful flush.
    pub async fn delete_urls(&self, raw_codes: &[String], user_id: i64) -> Result<()> {
        let short_codes: Vec<String> = raw_codes
            .iter()
            .map(|code| code.trim())
            .filter(|code| !code.is_empty())
            .map(str::to_string)
            .collect();

        if short_codes.is_empty() {
            return Err(ShortenerError::BadRequest(
                "no short codes were passed".to_string(),
            ));
        }
        if short_codes.len() > MAX_DELETE_CODES {
            return Err(ShortenerError::BadRequest(format!(
                "{} short codes were passed, the limit is {MAX_DELETE_CODES}",
                short_codes.len()
            )));
        }

        self.storage
            .check_deleted_urls(Self::deadline(), user_id, &short_codes)
            .await
            .map_err(storage_to_shortener_error)?;

        debug!(user_id, codes = short_codes.len(), "deletion queued");
        self.queue
            .enqueue(DeleteTask::new(user_id, short_codes))
            .await
    }

    pub async fn stats(&self) -> Result<Stats> {
        let urls = self
            .storage
            .stats(Self::deadline())
            .await
            .map_err(storage_to_shortener_error)?;
        Ok(Stats {
            urls,
            users: self.identity.users_count(),
        })
    }

    pub async fn ping(&self) -> Result<()> {
        self.storage
            .ping(Deadline::after(PING_BUDGET))
            .await
            .map_err(storage_to_shortener_error)
    }
}

/// Trims `raw` and requires an absolute URL with a host.
fn clean_url(raw: &str) -> std::result::Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty URL received".to_string());
    }

    let parsed = Url::parse(trimmed).map_err(|err| err.to_string())?;
    if !parsed.has_host() {
        return Err(format!("'{trimmed}' has no host"));
    }
    Ok(trimmed.to_string())
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    Url::parse(&candidate)
        .map_err(|err| ShortenerError::InvalidUrl(format!("base url '{raw}': {err}")))?;
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deletion::{self, PipelineSettings, StorageSink};
    use snip_core::codec::encode_url_code;
    use snip_core::ErrorKind;
    use snip_identity::IdentitySettings;
    use snip_storage::MemoryStorage;

    fn service() -> ShortenerService {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let identity = Arc::new(
            IdentityService::open(IdentitySettings::builder().secret_key("s3cret").build())
                .unwrap(),
        );
        let (queue, _handle) = deletion::spawn(
            Arc::new(StorageSink(storage.clone())),
            PipelineSettings::default(),
        );
        ShortenerService::new(storage, identity, queue, "http://localhost:8080/").unwrap()
    }

    #[test]
    fn clean_url_trims_and_validates() {
        assert_eq!(
            clean_url("  https://example.com/a  ").unwrap(),
            "https://example.com/a"
        );
        assert!(clean_url("   ").is_err());
        assert!(clean_url("example.com").is_err());
        assert!(clean_url("mailto:someone@example.com").is_err());
    }

    #[test]
    fn base_url_gets_a_scheme_and_loses_the_trailing_slash() {
        assert_eq!(normalize_base_url("localhost:8080/").unwrap(), "http://localhost:8080");
        assert_eq!(
            normalize_base_url("https://sn.ip").unwrap(),
            "https://sn.ip"
        );
    }

    #[tokio::test]
    async fn write_url_returns_an_absolute_short_url() {
        let service = service();
        let first = service.write_url(" https://example.com ", 1).await.unwrap();
        assert_eq!(
            first.short_url,
            format!("http://localhost:8080/{}", encode_url_code(1).unwrap())
        );
        assert!(!first.conflict);

        let again = service.write_url("https://example.com", 2).await.unwrap();
        assert!(again.conflict);
        assert_eq!(again.short_url, first.short_url);

        let err = service.write_url("", 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn batch_reports_every_bad_item() {
        let service = service();
        let items = vec![
            BatchItem {
                correlation_id: "ok".into(),
                original_url: "https://example.com".into(),
            },
            BatchItem {
                correlation_id: "blank".into(),
                original_url: " ".into(),
            },
            BatchItem {
                correlation_id: "relative".into(),
                original_url: "/just/a/path".into(),
            },
        ];

        let err = service.shorten_batch(items, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        let message = err.to_string();
        assert!(message.contains("pos: 1"));
        assert!(message.contains("relative"));
        assert!(!message.contains("\"ok\""));
        assert_eq!(service.stats().await.unwrap().urls, 0);
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let service = service();
        service.write_url("https://example.com/b", 1).await.unwrap();

        let items = vec![
            BatchItem {
                correlation_id: "1".into(),
                original_url: "https://example.com/a".into(),
            },
            BatchItem {
                correlation_id: "2".into(),
                original_url: "https://example.com/b".into(),
            },
            BatchItem {
                correlation_id: "3".into(),
                original_url: "https://example.com/a".into(),
            },
        ];
        let out = service.shorten_batch(items, 1).await.unwrap();

        let ids: Vec<&str> = out.iter().map(|r| r.correlation_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(out[0].short_url, out[2].short_url);
        assert!(out[1].short_url.ends_with(&encode_url_code(1).unwrap()));
        assert!(out[0].short_url.ends_with(&encode_url_code(2).unwrap()));
    }

    #[tokio::test]
    async fn empty_user_history_is_no_content() {
        let service = service();
        let err = service.user_urls(9).await.unwrap_err();
        assert!(matches!(err, ShortenerError::NoContent(_)));

        service.write_url("https://example.com", 9).await.unwrap();
        let listed = service.user_urls(9).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].original_url, "https://example.com");
    }

    #[tokio::test]
    async fn delete_rejects_empty_and_oversized_requests() {
        let service = service();

        let blanks = vec![" ".to_string(), String::new()];
        let err = service.delete_urls(&blanks, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let too_many: Vec<String> = (0..=MAX_DELETE_CODES).map(|i| format!("c{i}")).collect();
        let err = service.delete_urls(&too_many, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(err.to_string().contains("513"));
    }

    #[tokio::test]
    async fn delete_rejects_foreign_codes() {
        let service = service();
        let theirs = service.write_url("https://example.com", 2).await.unwrap();
        let code = theirs.short_url.rsplit('/').next().unwrap().to_string();

        let err = service.delete_urls(&[code.clone()], 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(service.read_url(&code).await.unwrap(), "https://example.com");
    }

    #[tokio::test]
    async fn ping_and_stats() {
        let service = service();
        let err = service.ping().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);

        service.identity().new_user().unwrap();
        service.write_url("https://example.com", 1).await.unwrap();
        assert_eq!(service.stats().await.unwrap(), Stats { urls: 1, users: 1 });
    }
}
