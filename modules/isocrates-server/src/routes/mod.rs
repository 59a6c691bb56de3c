pub mod docs;
pub mod webhooks;
