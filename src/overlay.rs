//! Consent/cookie overlay dismissal.
//!
//! Best-effort background maintenance that runs after navigation: a
//! domain-specific pass for sites with heavy consent walls, a generic
//! pass over visible accept/consent controls, and finally an injected
//! sweep that removes leftover banner containers. Every layer swallows
//! "not found" and driver failures; overlay handling must never fail the
//! action it runs alongside.

use std::sync::Arc;
use std::time::Duration;

use cdp_driver::{Driver, PageId};
use tracing::{debug, info};

/// Budget per selector probe inside a layer.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Budget for a click on a matched consent control.
const CLICK_TIMEOUT: Duration = Duration::from_secs(2);

const FT_CONSENT_SELECTORS: &[&str] = &[
    "button[title=\"Accept cookies\"]",
    "button[data-trackable=\"accept-cookies\"]",
    "#consent-accept-all",
    ".cookie-consent__button--accept",
    "button[data-trackable=\"accept-consent\"]",
];

const YOUTUBE_CONSENT_SELECTORS: &[&str] = &[
    "button[aria-label=\"Accept all\"]",
    "button[aria-label*=\"Accept\" i]",
];

const GENERIC_CONSENT_SELECTORS: &[&str] = &[
    "button[id*=\"accept\"]",
    "button[class*=\"accept\"]",
    "button[id*=\"consent\"]",
    "button[class*=\"consent\"]",
    "a[id*=\"accept\"]",
    "a[class*=\"accept\"]",
    "[aria-label*=\"accept\" i]",
    "[title*=\"accept\" i]",
];

/// Removes leftover banner containers matching common id/class patterns.
const BANNER_SWEEP_JS: &str = r#"
(() => {
  const selectors = [
    '#cookie-banner',
    '#cookie-consent',
    '#consent-banner',
    '.cookie-notice',
    '.consent-banner',
    '[class*="cookie-banner"]',
    '[class*="consent-banner"]',
    '[id*="cookie-banner"]',
    '[id*="consent-banner"]'
  ];
  let removed = 0;
  for (const selector of selectors) {
    for (const el of document.querySelectorAll(selector)) {
      el.remove();
      removed++;
    }
  }
  return removed;
})()
"#;

pub struct OverlayHandler;

impl OverlayHandler {
    /// Dismiss whatever consent/cookie overlay is currently blocking the
    /// page. Never returns an error.
    pub async fn dismiss_overlays(driver: &Arc<dyn Driver>, page: PageId, url: &str) {
        let selectors = Self::domain_selectors(url);
        if !selectors.is_empty() && Self::click_first_visible(driver, page, selectors).await {
            return;
        }

        if Self::click_first_visible(driver, page, GENERIC_CONSENT_SELECTORS).await {
            return;
        }

        match driver.evaluate(page, BANNER_SWEEP_JS).await {
            Ok(removed) => {
                if removed.as_u64().unwrap_or(0) > 0 {
                    info!(target: "overlay", url, removed = %removed, "swept leftover banners");
                }
            }
            Err(err) => {
                debug!(target: "overlay", ?err, "banner sweep failed (ignored)");
            }
        }
    }

    fn domain_selectors(url: &str) -> &'static [&'static str] {
        if url.contains("ft.com") {
            FT_CONSENT_SELECTORS
        } else if url.contains("youtube.com") {
            YOUTUBE_CONSENT_SELECTORS
        } else {
            &[]
        }
    }

    /// Try each selector in order; click the first visible match.
    async fn click_first_visible(
        driver: &Arc<dyn Driver>,
        page: PageId,
        selectors: &[&str],
    ) -> bool {
        for selector in selectors {
            let appeared = driver
                .wait_for_selector(page, selector, PROBE_TIMEOUT)
                .await
                .unwrap_or(false);
            if !appeared {
                continue;
            }
            let visible = driver
                .is_selector_visible(page, selector)
                .await
                .unwrap_or(false);
            if !visible {
                continue;
            }

            match driver.click(page, selector, CLICK_TIMEOUT).await {
                Ok(()) => {
                    info!(target: "overlay", selector, "dismissed consent control");
                    return true;
                }
                Err(err) => {
                    debug!(target: "overlay", selector, ?err, "consent click failed (ignored)");
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_tables_are_selected_by_url() {
        assert_eq!(
            OverlayHandler::domain_selectors("https://www.ft.com/content/abc"),
            FT_CONSENT_SELECTORS
        );
        assert_eq!(
            OverlayHandler::domain_selectors("https://youtube.com/results"),
            YOUTUBE_CONSENT_SELECTORS
        );
        assert!(OverlayHandler::domain_selectors("https://example.com").is_empty());
    }
}
