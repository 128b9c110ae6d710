use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use super::store::{BackupStore, RowFields, SheetRow};
use crate::cache::{Fetcher, Request, Response};

#[derive(Serialize)]
struct ApiCreateSheet<'a> {
  title: &'a str,
  headers: &'a [String],
}

#[derive(Serialize)]
struct ApiRowValues {
  values: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct ApiRowList {
  #[serde(default)]
  rows: Vec<SheetRow>,
}

/// Spreadsheet API client: `<base>/v1/spreadsheets/<id>/sheets/...`.
pub struct HttpSheetsStore<F: Fetcher> {
  fetcher: F,
  base_url: Url,
  spreadsheet_id: String,
  token: String,
}

impl<F: Fetcher> HttpSheetsStore<F> {
  pub fn new(base_url: &str, spreadsheet_id: &str, token: String, fetcher: F) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid backup base URL '{}': {}", base_url, e))?;

    Ok(Self {
      fetcher,
      base_url,
      spreadsheet_id: spreadsheet_id.to_string(),
      token,
    })
  }

  fn url(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base_url.clone();
    {
      let mut path = url
        .path_segments_mut()
        .map_err(|_| eyre!("Backup base URL cannot have a path: {}", self.base_url))?;
      path
        .pop_if_empty()
        .extend(["v1", "spreadsheets", self.spreadsheet_id.as_str(), "sheets"])
        .extend(segments);
    }
    Ok(url)
  }

  fn request(&self, method: Method, url: Url) -> Request {
    Request::new(method, url)
      .with_header("authorization", &format!("Bearer {}", self.token))
      .with_header("accept", "application/json")
  }

  async fn send(&self, request: Request) -> Result<Response> {
    self
      .fetcher
      .fetch(&request)
      .await
      .map_err(|e| eyre!("Backup request to {} failed: {}", request.url, e))
  }
}

fn row_values(values: &RowFields) -> ApiRowValues {
  ApiRowValues {
    values: values.iter().cloned().collect(),
  }
}

fn expect_success(response: Response, action: &str) -> Result<Response> {
  if response.is_success() {
    Ok(response)
  } else {
    Err(eyre!(
      "Failed to {}: HTTP {} {}",
      action,
      response.status,
      response.text()
    ))
  }
}

#[async_trait]
impl<F: Fetcher> BackupStore for HttpSheetsStore<F> {
  async fn ensure_sheet(&self, sheet: &str, headers: &[String]) -> Result<()> {
    let existing = self
      .send(self.request(Method::GET, self.url(&[sheet])?))
      .await?;
    if existing.status != 404 {
      expect_success(existing, &format!("read sheet {}", sheet))?;
      return Ok(());
    }

    let body = ApiCreateSheet {
      title: sheet,
      headers,
    };
    let request = self
      .request(Method::POST, self.url(&[])?)
      .with_json(&body)?;
    let created = self.send(request).await?;
    expect_success(created, &format!("create sheet {}", sheet))?;
    Ok(())
  }

  async fn list_rows(&self, sheet: &str) -> Result<Vec<SheetRow>> {
    let response = self
      .send(self.request(Method::GET, self.url(&[sheet, "rows"])?))
      .await?;
    let list: ApiRowList = expect_success(response, &format!("list rows of {}", sheet))?.json()?;
    Ok(list.rows)
  }

  async fn append_row(&self, sheet: &str, values: &RowFields) -> Result<()> {
    let request = self
      .request(Method::POST, self.url(&[sheet, "rows"])?)
      .with_json(&row_values(values))?;
    let response = self.send(request).await?;
    expect_success(response, &format!("append row to {}", sheet))?;
    Ok(())
  }

  async fn update_row(&self, sheet: &str, row_number: u32, values: &RowFields) -> Result<()> {
    let row = row_number.to_string();
    let request = self
      .request(Method::PUT, self.url(&[sheet, "rows", &row])?)
      .with_json(&row_values(values))?;
    let response = self.send(request).await?;
    expect_success(response, &format!("update row {} of {}", row_number, sheet))?;
    Ok(())
  }
}
