pub mod follow;

pub use follow::FollowService;
