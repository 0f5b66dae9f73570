//! Domain blacklist filter
//!
//! Active patterns are cached in memory and reloaded after every admin
//! mutation. Pattern kinds:
//! - `*.example.com` blocks `example.com` and any subdomain of it
//! - `example.com` blocks that exact host, and any host containing it

use crate::db::entities::blacklist_domains;
use crate::db::repo::{BlacklistPatch, Repo};
use crate::error::{AppError, AppResult};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

pub struct DomainFilter {
    repo: Arc<Repo>,
    cache: RwLock<Option<Arc<Vec<String>>>>,
}

impl DomainFilter {
    pub fn new(repo: Arc<Repo>) -> Self {
        Self {
            repo,
            cache: RwLock::new(None),
        }
    }

    /// Returns the matching pattern if `url` is blocked for this requester
    pub async fn is_blocked(&self, url: &str, is_admin: bool) -> AppResult<Option<String>> {
        let host = host_of(url)?;
        if is_admin {
            return Ok(None);
        }

        let patterns = self.patterns().await?;
        let matched = match_host(&host, &patterns);
        if let Some(pattern) = &matched {
            debug!("Host {} blocked by pattern {}", host, pattern);
        }
        Ok(matched)
    }

    pub async fn ensure_allowed(&self, url: &str, is_admin: bool) -> AppResult<()> {
        match self.is_blocked(url, is_admin).await? {
            Some(pattern) => Err(AppError::DomainBlocked { pattern }),
            None => Ok(()),
        }
    }

    /// Drop the cached rules; the next lookup reloads them
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn patterns(&self) -> AppResult<Arc<Vec<String>>> {
        if let Some(patterns) = self.cache.read().await.as_ref() {
            return Ok(patterns.clone());
        }

        let mut cache = self.cache.write().await;
        if let Some(patterns) = cache.as_ref() {
            return Ok(patterns.clone());
        }
        let loaded = Arc::new(
            self.repo
                .list_active_blacklist_patterns()
                .await?
                .into_iter()
                .map(|p| p.to_lowercase())
                .collect::<Vec<_>>(),
        );
        debug!("Loaded {} blacklist pattern(s)", loaded.len());
        *cache = Some(loaded.clone());
        Ok(loaded)
    }

    // ==================== Admin management ====================

    pub async fn list(&self) -> AppResult<Vec<blacklist_domains::Model>> {
        Ok(self.repo.list_blacklist().await?)
    }

    pub async fn create(
        &self,
        domain: &str,
        description: Option<String>,
        is_active: bool,
    ) -> AppResult<blacklist_domains::Model> {
        let domain = normalize_pattern(domain)?;
        if self.repo.find_blacklist_by_domain(&domain).await?.is_some() {
            return Err(AppError::Validation(format!(
                "domain '{}' is already blacklisted",
                domain
            )));
        }

        let row = self
            .repo
            .create_blacklist_domain(domain, description, is_active)
            .await?;
        self.invalidate().await;
        info!("Blacklist pattern added: {}", row.domain);
        Ok(row)
    }

    pub async fn update(
        &self,
        id: i32,
        mut patch: BlacklistPatch,
    ) -> AppResult<blacklist_domains::Model> {
        if let Some(domain) = patch.domain.take() {
            let domain = normalize_pattern(&domain)?;
            if let Some(existing) = self.repo.find_blacklist_by_domain(&domain).await? {
                if existing.id != id {
                    return Err(AppError::Validation(format!(
                        "domain '{}' is already blacklisted",
                        domain
                    )));
                }
            }
            patch.domain = Some(domain);
        }

        let row = self
            .repo
            .update_blacklist_domain(id, patch)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Blacklist entry {}", id)))?;
        self.invalidate().await;
        Ok(row)
    }

    pub async fn delete(&self, id: i32) -> AppResult<()> {
        if !self.repo.delete_blacklist_domain(id).await? {
            return Err(AppError::not_found(format!("Blacklist entry {}", id)));
        }
        self.invalidate().await;
        info!("Blacklist entry {} removed", id);
        Ok(())
    }
}

/// Lowercased host of `url` without a trailing dot
pub fn host_of(url: &str) -> AppResult<String> {
    let parsed =
        Url::parse(url.trim()).map_err(|e| AppError::Validation(format!("invalid url: {}", e)))?;
    let host = parsed
        .host_str()
        .map(|h| h.trim_end_matches('.').to_lowercase())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| AppError::Validation(format!("url has no host: {}", url)))?;
    Ok(host)
}

/// First pattern that blocks `host`, if any. Patterns must be lowercase.
pub fn match_host(host: &str, patterns: &[String]) -> Option<String> {
    patterns
        .iter()
        .find(|pattern| pattern_matches(host, pattern))
        .cloned()
}

fn pattern_matches(host: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return host == suffix || host.ends_with(&format!(".{}", suffix));
    }
    if host == pattern {
        return true;
    }
    let needle = pattern.replace('*', "");
    !needle.is_empty() && host.contains(&needle)
}

fn normalize_pattern(domain: &str) -> AppResult<String> {
    let domain = domain.trim().trim_end_matches('.').to_lowercase();
    if domain.is_empty() || domain == "*." || domain.chars().any(char::is_whitespace) {
        return Err(AppError::Validation(format!(
            "invalid domain pattern '{}'",
            domain
        )));
    }
    Ok(domain)
}
