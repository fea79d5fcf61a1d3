//! Images shown alongside narration.
//!
//! - `unsplash`: topic → image list (with attribution)
//! - `preload`: fetch image bytes ahead of display
//! - `rotation`: periodic index over the current image list

pub mod preload;
pub mod rotation;
pub mod unsplash;

pub use preload::{preload, ImageCache};
pub use rotation::ImageRotation;
pub use unsplash::{ImageItem, UnsplashClient};
