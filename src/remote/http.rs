use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    storage::entities::{CurrentTaskDoc, DailyRecord, TasksConfig, TimerRunState},
    utils::time::date_key,
};

use super::{RemoteError, RemoteStore};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [RemoteStore] over a plain JSON HTTP API:
///
/// - `GET/PUT    users/{uid}/config/tasks`
/// - `GET/PUT    users/{uid}/config/current-task`
/// - `GET/PUT/DELETE users/{uid}/config/timer-state`
/// - `GET/PUT    users/{uid}/days/{date}`
/// - `GET        users/{uid}/days?from=..&to=..`
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(base_url: String, token: Option<String>) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn url(&self, user: &str, tail: &str) -> String {
        format!(
            "{}/users/{user}/{tail}",
            self.base_url.trim_end_matches('/')
        )
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<Option<T>, RemoteError> {
        let resp = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_status(&resp)?;

        let data = resp
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Parsing(format!("Failed to parse response as JSON: {e}")))?;
        Ok(Some(data))
    }

    async fn put_json<T: Serialize + ?Sized>(
        &self,
        url: String,
        body: &T,
    ) -> Result<(), RemoteError> {
        let resp = self
            .request(Method::PUT, &url)
            .json(body)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        check_status(&resp)?;
        Ok(())
    }

    async fn delete(&self, url: String) -> Result<(), RemoteError> {
        let resp = self
            .request(Method::DELETE, &url)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(&resp)?;
        Ok(())
    }
}

fn check_status(resp: &reqwest::Response) -> Result<(), RemoteError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RemoteError::Unauthorized);
    }
    if !status.is_success() {
        return Err(RemoteError::Response {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or("unknown").to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch_tasks(&self, user: &str) -> Result<Option<TasksConfig>, RemoteError> {
        self.get_json(self.url(user, "config/tasks")).await
    }

    async fn put_tasks(&self, user: &str, config: &TasksConfig) -> Result<(), RemoteError> {
        self.put_json(self.url(user, "config/tasks"), config).await
    }

    async fn fetch_current_task(&self, user: &str) -> Result<Option<CurrentTaskDoc>, RemoteError> {
        self.get_json(self.url(user, "config/current-task")).await
    }

    async fn put_current_task(&self, user: &str, doc: &CurrentTaskDoc) -> Result<(), RemoteError> {
        self.put_json(self.url(user, "config/current-task"), doc)
            .await
    }

    async fn fetch_timer_state(&self, user: &str) -> Result<Option<TimerRunState>, RemoteError> {
        self.get_json(self.url(user, "config/timer-state")).await
    }

    async fn put_timer_state<'a>(
        &self,
        user: &str,
        state: Option<&'a TimerRunState>,
    ) -> Result<(), RemoteError> {
        match state {
            Some(state) => {
                self.put_json(self.url(user, "config/timer-state"), state)
                    .await
            }
            None => self.delete(self.url(user, "config/timer-state")).await,
        }
    }

    async fn fetch_day(&self, user: &str, date: &str) -> Result<Option<DailyRecord>, RemoteError> {
        self.get_json(self.url(user, &format!("days/{date}"))).await
    }

    async fn put_day(&self, user: &str, day: &DailyRecord) -> Result<(), RemoteError> {
        self.put_json(self.url(user, &format!("days/{}", day.date)), day)
            .await
    }

    async fn recorded_dates(
        &self,
        user: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<String>, RemoteError> {
        let url = self.url(
            user,
            &format!("days?from={}&to={}", date_key(from), date_key(to)),
        );
        let dates = self.get_json::<Vec<String>>(url).await?;
        Ok(dates.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::HttpRemoteStore;

    #[test]
    fn urls_join_without_doubled_slashes() {
        let store = HttpRemoteStore::new("https://sync.example.com/".into(), None).unwrap();
        assert_eq!(
            store.url("u1", "config/tasks"),
            "https://sync.example.com/users/u1/config/tasks"
        );
        assert_eq!(
            store.url("u1", "days/2024-03-07"),
            "https://sync.example.com/users/u1/days/2024-03-07"
        );
    }
}
