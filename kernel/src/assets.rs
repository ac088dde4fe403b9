// Static asset URLs for the site and the playback widget.

use crate::config::SiteConfig;

/// Resolves asset paths against the configured base URLs.
#[derive(Debug, Clone)]
pub struct AssetUrls {
    static_url: String,
    joust_static_url: String,
    card_art_url: String,
}

impl AssetUrls {
    pub fn from_config(config: &SiteConfig) -> Self {
        Self {
            static_url: config.static_url.clone(),
            joust_static_url: config.joust_static_url.clone(),
            card_art_url: config.card_art_url.clone(),
        }
    }

    pub fn static_file(&self, file: &str) -> String {
        format!("{}{file}", self.static_url)
    }

    pub fn image(&self, image: &str) -> String {
        self.static_file(&format!("images/{image}"))
    }

    /// Asset used by the playback widget (sprites, fonts, sounds).
    pub fn joust_asset(&self, asset: &str) -> String {
        format!("{}assets/{asset}", self.joust_static_url)
    }

    pub fn card_art(&self, card_id: &str) -> String {
        format!("{}{card_id}.jpg", self.card_art_url)
    }
}
