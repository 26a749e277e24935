//! Token repository.

use crate::error::MetadataResult;
use crate::models::{TokenKind, TokenRow};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for user session and agent tokens.
#[async_trait]
pub trait TokenRepo: Send + Sync {
    async fn create_token(&self, token: &TokenRow) -> MetadataResult<()>;

    /// Get a token by the hash of its secret.
    async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>>;

    async fn get_token(&self, token_id: &str) -> MetadataResult<Option<TokenRow>>;

    /// Record use of a token.
    async fn touch_token(&self, token_id: &str, used_at: OffsetDateTime) -> MetadataResult<()>;

    /// Tokens of one kind owned by a user, newest first.
    async fn list_tokens(&self, user_id: &str, kind: TokenKind) -> MetadataResult<Vec<TokenRow>>;

    /// Delete a token owned by `user_id`. Returns whether it existed.
    async fn delete_token(&self, user_id: &str, token_id: &str) -> MetadataResult<bool>;
}
