pub mod cdp;
pub mod chrome;
pub mod profile;

pub use cdp::CdpClient;
pub use chrome::{find_chrome_binary, BrowserSession, LaunchOptions, WHATSAPP_WEB_URL};
pub use profile::{ProfileMode, ProfileStore};
