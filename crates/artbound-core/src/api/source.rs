use anyhow::Result;
use async_trait::async_trait;

/// A spreadsheet row as a list of stringified cells.
pub type SheetRow = Vec<String>;

/// Remote capabilities the cache depends on.
///
/// `GoogleClient` implements this against the Sheets and Drive APIs; tests
/// substitute an in-memory fake.
#[async_trait]
pub trait ArtSource: Send + Sync {
    /// Fetch every submission row from the spreadsheet.
    async fn fetch_rows(&self) -> Result<Vec<SheetRow>>;

    /// Look up the original name of a remote file.
    async fn file_name(&self, file_id: &str) -> Result<String>;

    /// Download the content of a remote file.
    async fn download(&self, file_id: &str) -> Result<Vec<u8>>;
}
