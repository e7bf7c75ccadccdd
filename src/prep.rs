//! Pre-navigation page preparation steps.
//!
//! An ordered set of page mutations applied before the first navigation,
//! each independently enableable. They exist so fingerprint-evasion overrides
//! (navigator platform, WebGL vendor, language list, ...) have a place to
//! live; none of them improved results against the current target, so every
//! step ships disabled and the default run applies nothing.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;

use crate::session::SessionOptions;
use crate::Result;

/// One pre-navigation page mutation.
#[async_trait]
pub trait PrepStep: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the step runs. Disabled by default.
    fn enabled(&self) -> bool {
        false
    }

    /// Apply the mutation to the page.
    async fn apply(&self, page: &Page) -> Result<()>;
}

async fn inject(page: &Page, source: String) -> Result<()> {
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(source))
        .await?;
    Ok(())
}

/// Overrides `navigator.platform`.
pub struct PlatformOverride(pub String);

#[async_trait]
impl PrepStep for PlatformOverride {
    fn name(&self) -> &'static str {
        "platform-override"
    }

    async fn apply(&self, page: &Page) -> Result<()> {
        let source = format!(
            "Object.defineProperty(navigator, 'platform', {{ get: () => {:?} }});",
            self.0
        );
        inject(page, source).await
    }
}

/// Overrides `navigator.vendor`.
pub struct VendorOverride(pub String);

#[async_trait]
impl PrepStep for VendorOverride {
    fn name(&self) -> &'static str {
        "vendor-override"
    }

    async fn apply(&self, page: &Page) -> Result<()> {
        let source = format!(
            "Object.defineProperty(navigator, 'vendor', {{ get: () => {:?} }});",
            self.0
        );
        inject(page, source).await
    }
}

/// Overrides `navigator.languages`.
pub struct LanguagesOverride(pub Vec<String>);

#[async_trait]
impl PrepStep for LanguagesOverride {
    fn name(&self) -> &'static str {
        "languages-override"
    }

    async fn apply(&self, page: &Page) -> Result<()> {
        let list = serde_json::to_string(&self.0)?;
        let source =
            format!("Object.defineProperty(navigator, 'languages', {{ get: () => {list} }});");
        inject(page, source).await
    }
}

/// Hides `navigator.webdriver`.
pub struct WebDriverOverride;

#[async_trait]
impl PrepStep for WebDriverOverride {
    fn name(&self) -> &'static str {
        "webdriver-override"
    }

    async fn apply(&self, page: &Page) -> Result<()> {
        inject(
            page,
            "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });".to_string(),
        )
        .await
    }
}

/// Spoofs the WebGL unmasked vendor string.
pub struct WebGlVendorOverride(pub String);

#[async_trait]
impl PrepStep for WebGlVendorOverride {
    fn name(&self) -> &'static str {
        "webgl-vendor-override"
    }

    async fn apply(&self, page: &Page) -> Result<()> {
        // UNMASKED_VENDOR_WEBGL
        let source = format!(
            "const getParameter = WebGLRenderingContext.prototype.getParameter;\n\
             WebGLRenderingContext.prototype.getParameter = function (p) {{\n\
                 if (p === 37445) return {:?};\n\
                 return getParameter.call(this, p);\n\
             }};",
            self.0
        );
        inject(page, source).await
    }
}

/// The default ordered step set, built from session options. All disabled.
pub fn default_prep_steps(options: &SessionOptions) -> Vec<Box<dyn PrepStep>> {
    let platform = options
        .platform
        .clone()
        .unwrap_or_else(|| crate::session::DEFAULT_PLATFORM.to_string());
    let languages = options
        .languages
        .clone()
        .unwrap_or_else(|| vec!["en-US".to_string(), "en".to_string()]);

    vec![
        Box::new(PlatformOverride(platform)),
        Box::new(WebDriverOverride),
        Box::new(LanguagesOverride(languages)),
        Box::new(VendorOverride(options.vendor.clone())),
        Box::new(WebGlVendorOverride(options.vendor.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_steps_all_disabled() {
        let steps = default_prep_steps(&SessionOptions::default());
        assert_eq!(steps.len(), 5);
        assert!(steps.iter().all(|s| !s.enabled()));
    }

    #[test]
    fn test_step_order_is_stable() {
        let steps = default_prep_steps(&SessionOptions::default());
        let names: Vec<_> = steps.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "platform-override",
                "webdriver-override",
                "languages-override",
                "vendor-override",
                "webgl-vendor-override",
            ]
        );
    }
}
