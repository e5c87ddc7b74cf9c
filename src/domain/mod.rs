pub mod custom_field;
pub mod email_address;
pub mod list_id;
pub mod subscriber;
pub mod subscription_status;
