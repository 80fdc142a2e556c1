//! # Leafcheck Browser
//!
//! A minimal W3C WebDriver client plus the Leaflow site adapter built on it.

pub mod leaflow;
pub mod scrape;
pub mod webdriver;

pub use leaflow::LeaflowSite;
pub use webdriver::{WebDriverClient, WebDriverSession};
