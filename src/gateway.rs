//! Typed calls to the SnipURL service.
//!
//! The gateway covers the resources behind the console: short URLs and their
//! click logs, groups, the dashboard and the assistant. Authentication and
//! session maintenance are left to the [`Client`]; the gateway adds request
//! shapes, response parsing and, for reads, retrying of transient failures.

use std::{fmt::Debug, sync::Arc};

use serde::de::DeserializeOwned;
use url::Url;

use crate::{
    config::Config,
    error::Result,
    http::{Client, Request},
    protocol::{
        chatbot::{self, Message, Prompt, Reply},
        dashboard::{self, Analytics, AnalyticsQuery, Overview},
        groups::{self, Group, GroupDraft, GroupList, GroupPayload, GroupStats},
        urls::{
            self, BulkCreate, BulkDelete, BulkResult, ClickLogPage, ShortUrl, UrlDraft,
            UrlPayload, UrlPage, UrlQuery, UrlStats,
        },
        Pagination,
    },
    retry::{retry, RetryPolicy},
};

#[derive(Debug)]
pub struct Gateway {
    http_client: Arc<Client>,
    retry_policy: RetryPolicy,
    short_url_base: Url,
}

impl Gateway {
    #[must_use]
    pub fn new(http_client: Arc<Client>, config: &Config) -> Self {
        Self {
            http_client,
            retry_policy: config.retry,
            short_url_base: config.short_url_base.clone(),
        }
    }

    /// Returns the human-visible link of a short code.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `code` does not form a valid URL.
    pub fn short_link(&self, code: &str) -> Result<Url> {
        let mut base = self.short_url_base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        base.join(code.trim_start_matches('/')).map_err(Into::into)
    }

    /// Sends an idempotent read, retrying transient failures.
    async fn fetch<T>(&self, request: Request) -> Result<T>
    where
        T: DeserializeOwned + Debug,
    {
        retry(self.retry_policy, || {
            let request = request.clone();
            async move { self.http_client.send(request).await?.data() }
        })
        .await
    }

    pub async fn urls(&self, query: &UrlQuery) -> Result<UrlPage> {
        self.fetch(Request::get(urls::URLS).query(query)?).await
    }

    pub async fn url(&self, id: &str) -> Result<ShortUrl> {
        self.fetch::<UrlPayload>(Request::get(urls::url(id)))
            .await
            .map(Into::into)
    }

    pub async fn create_url(&self, draft: &UrlDraft) -> Result<ShortUrl> {
        self.http_client
            .post::<_, UrlPayload>(urls::URLS, draft)
            .await
            .map(Into::into)
    }

    pub async fn update_url(&self, id: &str, draft: &UrlDraft) -> Result<ShortUrl> {
        self.http_client
            .put::<_, UrlPayload>(&urls::url(id), draft)
            .await
            .map(Into::into)
    }

    pub async fn delete_url(&self, id: &str) -> Result<()> {
        self.http_client.delete(&urls::url(id)).await
    }

    pub async fn url_stats(&self, id: &str) -> Result<UrlStats> {
        self.fetch(Request::get(urls::stats(id))).await
    }

    pub async fn create_urls(&self, drafts: Vec<UrlDraft>) -> Result<BulkResult> {
        self.http_client
            .post(urls::BULK, &BulkCreate { urls: drafts })
            .await
    }

    pub async fn delete_urls(&self, ids: Vec<String>) -> Result<BulkResult> {
        let request = Request::delete(urls::BULK).json(&BulkDelete { url_ids: ids })?;
        self.http_client.send(request).await?.data()
    }

    /// Returns a page of the click log of a short URL.
    pub async fn click_logs(&self, id: &str, page: &Pagination) -> Result<ClickLogPage> {
        let mut request = Request::get(urls::click_logs(id));
        if page.page > 0 || page.limit > 0 {
            request = request.query(&UrlQuery {
                page: (page.page > 0).then_some(page.page),
                limit: (page.limit > 0).then_some(page.limit),
                ..UrlQuery::default()
            })?;
        }

        self.fetch(request).await
    }

    pub async fn groups(&self) -> Result<Vec<Group>> {
        self.fetch::<GroupList>(Request::get(groups::GROUPS))
            .await
            .map(Into::into)
    }

    pub async fn group(&self, id: &str) -> Result<Group> {
        self.fetch::<GroupPayload>(Request::get(groups::group(id)))
            .await
            .map(Into::into)
    }

    pub async fn create_group(&self, draft: &GroupDraft) -> Result<Group> {
        self.http_client
            .post::<_, GroupPayload>(groups::GROUPS, draft)
            .await
            .map(Into::into)
    }

    pub async fn update_group(&self, id: &str, draft: &GroupDraft) -> Result<Group> {
        self.http_client
            .put::<_, GroupPayload>(&groups::group(id), draft)
            .await
            .map(Into::into)
    }

    pub async fn delete_group(&self, id: &str) -> Result<()> {
        self.http_client.delete(&groups::group(id)).await
    }

    pub async fn group_stats(&self, id: &str) -> Result<GroupStats> {
        self.fetch(Request::get(groups::stats(id))).await
    }

    pub async fn overview(&self) -> Result<Overview> {
        self.fetch(Request::get(dashboard::DASHBOARD)).await
    }

    pub async fn analytics(&self, query: &AnalyticsQuery) -> Result<Analytics> {
        self.fetch(Request::get(dashboard::ANALYTICS).query(query)?)
            .await
    }

    /// Sends a prompt to the assistant. Not retried, to not ask twice.
    pub async fn send_message(&self, message: &str) -> Result<Reply> {
        let prompt = Prompt {
            message: message.to_owned(),
        };
        self.http_client.post(chatbot::MESSAGE, &prompt).await
    }

    pub async fn history(&self) -> Result<Vec<Message>> {
        self.fetch::<chatbot::History>(Request::get(chatbot::HISTORY))
            .await
            .map(Into::into)
    }

    pub async fn clear_history(&self) -> Result<()> {
        self.http_client.delete(chatbot::HISTORY).await
    }
}
