pub mod channels;
pub mod disputes;
pub mod fraud;
pub mod recon;
pub mod webhooks;
