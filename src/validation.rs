use serde::Deserialize;
use validator::Validate;

use crate::error::{Error, Result};

pub const DEFAULT_PER_PAGE: usize = 50;
pub const MAX_PER_PAGE: usize = 500;

/// Query string accepted by the `/records` and `/groups` listings.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ListQuery {
    #[validate(range(min = 1, message = "page starts at 1"))]
    pub page: Option<usize>,

    #[validate(range(min = 1, max = 500, message = "per_page must be between 1 and 500"))]
    pub per_page: Option<usize>,

    pub group: Option<u64>,

    #[validate(length(min = 1, max = 128, message = "q must be 1 to 128 characters"))]
    pub q: Option<String>,
}

impl ListQuery {
    /// Field rules plus the selector rule: a search is not paged.
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.q.is_some() && self.page.is_some() {
            return Err(Error::InvalidRequest(
                "'q' and 'page' cannot be combined".to_string(),
            ));
        }
        Ok(())
    }

    pub fn page(&self) -> usize {
        self.page.unwrap_or(1)
    }

    pub fn per_page(&self) -> usize {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE).min(MAX_PER_PAGE)
    }

    /// Start offset of the requested page, saturating on absurd pages.
    pub fn offset(&self) -> usize {
        (self.page() - 1).saturating_mul(self.per_page())
    }
}
