//! Chrome DevTools backend: a [`PageDom`] that drives a real tab through a
//! small page-resident helper script, plus session setup and the network
//! observer feeding the [`NetworkMonitor`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{self, EventRequestWillBeSent};
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::agent::PageAgent;
use crate::config::{AgentTimings, SelectorConfig};
use crate::dom::{ElementRef, PageDom, PageStatus, SubmitControl};
use crate::error::{AgentError, Result};
use crate::monitor::NetworkMonitor;
use crate::protocol::{AgentHandle, HostRequest, PageId};
use crate::supervisor::AgentInjector;

const HELPER: &str = "__promptAgent";

/// Installs `window.__promptAgent`. Elements handed back to the host are
/// tagged with `data-prompt-agent-ref` and addressed by that value.
const HELPER_SCRIPT: &str = r#"
(() => {
  if (window.__promptAgent) return true;
  const ATTR = 'data-prompt-agent-ref';
  let nextRef = 1;

  const query = (sel) => {
    try { return Array.from(document.querySelectorAll(sel)); } catch (_) { return []; }
  };
  const visible = (el) => {
    if (!el || !el.isConnected) return false;
    const rect = el.getBoundingClientRect();
    if (rect.width === 0 && rect.height === 0) return false;
    const style = getComputedStyle(el);
    return style.visibility !== 'hidden' && style.display !== 'none' && style.opacity !== '0';
  };
  const refOf = (el) => {
    let ref = el.getAttribute(ATTR);
    if (!ref) { ref = String(nextRef++); el.setAttribute(ATTR, ref); }
    return ref;
  };
  const byRef = (ref) => document.querySelector('[' + ATTR + '="' + ref + '"]');
  const textOf = (el) => (el.innerText || el.textContent || '').trim();
  const firstText = (selectors) => {
    for (const sel of selectors) {
      for (const el of query(sel).filter(visible)) {
        const text = textOf(el);
        if (text) return text;
      }
    }
    return null;
  };

  window.__promptAgent = {
    findFirstVisible(selectors) {
      for (const sel of selectors) {
        const el = query(sel).find(visible);
        if (el) return refOf(el);
      }
      return null;
    },

    setValue(ref, text) {
      const el = byRef(ref);
      if (!el) return false;
      el.focus();
      if (el.isContentEditable) {
        document.execCommand('selectAll', false, null);
        document.execCommand('insertText', false, text);
      } else {
        const proto = el instanceof HTMLTextAreaElement
          ? HTMLTextAreaElement.prototype
          : HTMLInputElement.prototype;
        const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
        setter.call(el, text);
      }
      el.dispatchEvent(new Event('input', { bubbles: true }));
      el.dispatchEvent(new Event('change', { bubbles: true }));
      el.dispatchEvent(new KeyboardEvent('keydown', { bubbles: true, key: ' ' }));
      el.dispatchEvent(new KeyboardEvent('keyup', { bubbles: true, key: ' ' }));
      return true;
    },

    readValue(ref) {
      const el = byRef(ref);
      if (!el) return null;
      return el.isContentEditable ? textOf(el) : el.value;
    },

    findSubmit(ref, texts, labels) {
      const input = byRef(ref);
      const near = input && (input.closest('form')
        || (input.parentElement && input.parentElement.parentElement
            && input.parentElement.parentElement.parentElement));
      const lowerTexts = texts.map((t) => t.toLowerCase());
      const lowerLabels = labels.map((l) => l.toLowerCase());
      const matches = (el) => {
        const text = (textOf(el) || el.value || '').toLowerCase();
        const label = (el.getAttribute('aria-label') || el.title || '').toLowerCase();
        return lowerTexts.some((t) => text.includes(t))
          || lowerLabels.some((l) => label.includes(l));
      };
      for (const root of [near, document]) {
        if (!root) continue;
        const el = Array.from(root.querySelectorAll('button, [role="button"], input[type="submit"]'))
          .filter(visible)
          .find(matches);
        if (el) {
          return {
            element: refOf(el),
            enabled: !el.disabled && el.getAttribute('aria-disabled') !== 'true',
            label: textOf(el) || el.getAttribute('aria-label') || '',
          };
        }
      }
      return null;
    },

    click(ref) {
      const el = byRef(ref);
      if (!el) return false;
      el.click();
      return true;
    },

    pressEnter(ref) {
      const el = byRef(ref);
      if (!el) return false;
      el.focus();
      for (const type of ['keydown', 'keypress', 'keyup']) {
        el.dispatchEvent(new KeyboardEvent(type, {
          key: 'Enter', code: 'Enter', keyCode: 13, which: 13, bubbles: true, cancelable: true,
        }));
      }
      return true;
    },

    submitForm(ref) {
      const el = byRef(ref);
      const form = el && el.closest('form');
      if (!form) return false;
      if (form.requestSubmit) form.requestSubmit(); else form.submit();
      return true;
    },

    status(loading, status, error) {
      return {
        loading: loading.some((sel) => query(sel).some(visible)),
        status_text: firstText(status),
        error_text: firstText(error),
      };
    },

    visibleTexts(selectors) {
      return selectors
        .flatMap((sel) => query(sel).filter(visible).map(textOf))
        .filter((text) => text.length > 0);
    },
  };
  return true;
})()
"#;

#[derive(Deserialize, Default)]
struct HelperReply {
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    value: Value,
}

/// [`PageDom`] over one Chrome tab.
#[derive(Clone)]
pub struct ChromeDom {
    page: Page,
}

impl ChromeDom {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    async fn eval(&self, expression: String) -> Result<Value> {
        let result = self.page.evaluate(expression).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    /// Call a helper method. A missing helper means the page reloaded.
    async fn call<T: DeserializeOwned>(&self, method: &str, args: &[Value]) -> Result<T> {
        let args = args
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let expression = format!(
            "(() => {{ const a = window.{HELPER}; if (!a) return {{ missing: true }}; \
             return {{ value: a.{method}({args}) }}; }})()"
        );

        let raw = self.eval(expression).await?;
        let reply: HelperReply = serde_json::from_value(raw)
            .map_err(|e| AgentError::Dom(format!("{}: malformed helper reply: {}", method, e)))?;
        if reply.missing {
            return Err(AgentError::ReceiverMissing);
        }
        serde_json::from_value(reply.value)
            .map_err(|e| AgentError::Dom(format!("{}: unexpected result: {}", method, e)))
    }

    async fn call_on(&self, method: &str, element: &ElementRef, extra: &[Value]) -> Result<bool> {
        let mut args = vec![json!(element.0)];
        args.extend_from_slice(extra);
        self.call(method, &args).await
    }
}

#[async_trait]
impl PageDom for ChromeDom {
    async fn is_installed(&self) -> Result<bool> {
        let value = self
            .eval(format!("typeof window.{HELPER} === 'object'"))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn install(&self) -> Result<()> {
        self.eval(HELPER_SCRIPT.to_string()).await?;
        debug!("Page helper installed");
        Ok(())
    }

    async fn find_first_visible(&self, selectors: &[String]) -> Result<Option<ElementRef>> {
        let found: Option<String> = self.call("findFirstVisible", &[json!(selectors)]).await?;
        Ok(found.map(ElementRef))
    }

    async fn set_value(&self, element: &ElementRef, text: &str) -> Result<()> {
        if self.call_on("setValue", element, &[json!(text)]).await? {
            Ok(())
        } else {
            Err(detached(element))
        }
    }

    async fn read_value(&self, element: &ElementRef) -> Result<String> {
        let value: Option<String> = self.call("readValue", &[json!(element.0)]).await?;
        value.ok_or_else(|| detached(element))
    }

    async fn find_submit_control(
        &self,
        near: &ElementRef,
        texts: &[String],
        labels: &[String],
    ) -> Result<Option<SubmitControl>> {
        self.call("findSubmit", &[json!(near.0), json!(texts), json!(labels)])
            .await
    }

    async fn click(&self, element: &ElementRef) -> Result<()> {
        if self.call_on("click", element, &[]).await? {
            Ok(())
        } else {
            Err(detached(element))
        }
    }

    async fn press_enter(&self, element: &ElementRef) -> Result<()> {
        if self.call_on("pressEnter", element, &[]).await? {
            Ok(())
        } else {
            Err(detached(element))
        }
    }

    async fn submit_form(&self, element: &ElementRef) -> Result<bool> {
        self.call_on("submitForm", element, &[]).await
    }

    async fn status(
        &self,
        loading_selectors: &[String],
        status_selectors: &[String],
        error_selectors: &[String],
    ) -> Result<PageStatus> {
        self.call(
            "status",
            &[
                json!(loading_selectors),
                json!(status_selectors),
                json!(error_selectors),
            ],
        )
        .await
    }

    async fn visible_texts(&self, selectors: &[String]) -> Result<Vec<String>> {
        self.call("visibleTexts", &[json!(selectors)]).await
    }
}

fn detached(element: &ElementRef) -> AgentError {
    AgentError::Dom(format!("element {} is no longer in the page", element.0))
}

/// Re-installs the helper into a tab and spawns a fresh agent bound to it.
pub struct ChromeInjector {
    page: Page,
    host: mpsc::Sender<HostRequest>,
    selectors: Arc<SelectorConfig>,
    timings: AgentTimings,
}

impl ChromeInjector {
    pub fn new(
        page: Page,
        host: mpsc::Sender<HostRequest>,
        selectors: Arc<SelectorConfig>,
        timings: AgentTimings,
    ) -> Self {
        Self {
            page,
            host,
            selectors,
            timings,
        }
    }
}

#[async_trait]
impl AgentInjector for ChromeInjector {
    async fn inject(&self, page_id: &str) -> Result<AgentHandle> {
        let dom = ChromeDom::new(self.page.clone());
        dom.install().await?;
        info!(page_id, "Agent injected");
        Ok(PageAgent::new(page_id, Arc::new(dom), self.host.clone())
            .with_selectors(Arc::clone(&self.selectors))
            .with_timings(self.timings.clone())
            .spawn())
    }
}

fn default_target_url() -> String {
    "https://labs.google/fx/tools/flow".to_string()
}

fn default_headless() -> bool {
    false
}

/// How to reach the browser and which tab to drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChromeConfig {
    /// DevTools endpoint of a running Chrome (`ws://...` or
    /// `http://127.0.0.1:9222`). When unset a browser is launched.
    #[serde(default)]
    pub connect_url: Option<String>,

    /// Existing tab whose URL starts with this is reused; otherwise a new tab
    /// is opened here.
    #[serde(default = "default_target_url")]
    pub target_url: String,

    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Persistent profile so the user's login survives restarts.
    #[serde(default)]
    pub user_data_dir: Option<PathBuf>,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            connect_url: None,
            target_url: default_target_url(),
            headless: default_headless(),
            user_data_dir: None,
        }
    }
}

/// A connected browser and the one target tab.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    page_id: PageId,
    handler: JoinHandle<()>,
}

impl ChromeSession {
    pub async fn open(config: &ChromeConfig) -> Result<Self> {
        let (mut browser, mut handler) = match &config.connect_url {
            Some(url) => {
                info!("Connecting to Chrome at {}", url);
                Browser::connect(url.clone()).await?
            }
            None => {
                info!("Launching new browser instance");
                let mut builder = chromiumoxide::BrowserConfig::builder()
                    .arg("--disable-blink-features=AutomationControlled");
                if !config.headless {
                    builder = builder.with_head();
                }
                if let Some(dir) = &config.user_data_dir {
                    builder = builder.user_data_dir(dir);
                }
                let browser_config = builder.build().map_err(AgentError::Dom)?;
                Browser::launch(browser_config).await?
            }
        };

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {}", e);
                }
            }
        });

        if let Err(e) = browser.fetch_targets().await {
            debug!("Fetching targets failed: {}", e);
        }
        let mut existing = None;
        for page in browser.pages().await? {
            if let Ok(Some(url)) = page.url().await {
                if url.starts_with(&config.target_url) {
                    existing = Some(page);
                    break;
                }
            }
        }

        let page = match existing {
            Some(page) => {
                info!("Reusing open tab for {}", config.target_url);
                page
            }
            None => {
                info!("Opening tab for {}", config.target_url);
                browser.new_page(config.target_url.as_str()).await?
            }
        };
        page.execute(network::EnableParams::default()).await?;
        let page_id = page.target_id().as_ref().to_string();

        Ok(Self {
            browser,
            page,
            page_id,
            handler,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    /// Feed matching outbound requests of the tab into `monitor`.
    pub async fn watch_network(
        &self,
        monitor: NetworkMonitor,
        selectors: Arc<SelectorConfig>,
    ) -> Result<JoinHandle<()>> {
        let mut events = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await?;
        let page_id = self.page_id.clone();

        Ok(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let url = &event.request.url;
                if selectors.is_telemetry_url(url) && monitor.record_activity(&page_id) {
                    trace!(page_id = %page_id, url = %url, "Telemetry request");
                }
            }
            warn!(page_id = %page_id, "Network event stream ended");
        }))
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("Browser close failed: {}", e);
        }
        self.handler.abort();
    }
}
