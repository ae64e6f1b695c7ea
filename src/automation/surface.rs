//! The page-rendering surface and the fixed DOM operations run against it.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{ErrorKind, ProviderError};

/// One fixed DOM operation. Each maps to a single self-contained script.
#[derive(Debug, Clone, PartialEq)]
pub enum DomOp {
    /// Hide overlays matching `patterns`, click close controls, send Escape
    DismissModals {
        patterns: Vec<String>,
        close_labels: Vec<String>,
    },
    /// Locate the URL input by attribute hints, in priority order
    FindInput { hints: Vec<String> },
    /// Clear, native-set, dispatch events, blur/refocus and read back
    SetValue { selector: String, value: String },
    ClearValue { selector: String },
    /// Append one character with key and input events
    TypeChar { selector: String, ch: char },
    ReadValue { selector: String },
    /// Click a submit-like control, else submit the form, else press Enter
    Submit { selector: String, labels: Vec<String> },
    /// Wrap fetch/XHR with an in-flight counter; idempotent
    InstallNetworkMonitor,
    /// Current in-flight count and node count
    ReadActivity,
    PageText,
    /// Candidate result elements with tag, selector, text and style flags
    CollectCandidates { hints: Vec<String> },
}

const DISMISS_MODALS: &str = r#"
const found = [];
const seen = new Set();
for (const pattern of args.patterns) {
  let nodes = [];
  try { nodes = document.querySelectorAll(pattern); } catch (e) { continue; }
  for (const el of nodes) {
    if (seen.has(el)) continue;
    seen.add(el);
    const actions = [];
    if (el.style && el.style.display !== 'none') { el.style.display = 'none'; actions.push('hide'); }
    for (const btn of el.querySelectorAll('button, [role="button"], a, span')) {
      const label = ((btn.getAttribute('aria-label') || '') + ' ' + (btn.textContent || '')).trim().toLowerCase();
      if (args.close_labels.some(l => label === l || label.startsWith(l + ' ') || label.includes(l))) {
        btn.click(); actions.push('click_close'); break;
      }
    }
    el.dispatchEvent(new KeyboardEvent('keydown', { key: 'Escape', code: 'Escape', keyCode: 27, bubbles: true }));
    actions.push('escape');
    found.push({ pattern, tag: el.tagName.toLowerCase(), actions });
  }
}
document.dispatchEvent(new KeyboardEvent('keydown', { key: 'Escape', code: 'Escape', keyCode: 27, bubbles: true }));
return { count: found.length, found };
"#;

const FIND_INPUT: &str = r#"
const visible = el => {
  const r = el.getBoundingClientRect();
  const s = window.getComputedStyle(el);
  return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none' && !el.disabled;
};
const fields = Array.from(document.querySelectorAll('input[type="text"], input[type="url"], input:not([type]), textarea')).filter(visible);
for (const hint of args.hints) {
  for (const el of fields) {
    const attrs = ['placeholder', 'name', 'id', 'aria-label', 'class', 'type']
      .map(a => (el.getAttribute(a) || '').toLowerCase()).join(' ');
    if (attrs.includes(hint)) {
      el.setAttribute('data-st-target', '1');
      return { found: true, selector: '[data-st-target="1"]', hint, tag: el.tagName.toLowerCase() };
    }
  }
}
if (fields.length === 1) {
  fields[0].setAttribute('data-st-target', '1');
  return { found: true, selector: '[data-st-target="1"]', hint: 'only_field', tag: fields[0].tagName.toLowerCase() };
}
return { found: false, candidates: fields.length };
"#;

const SET_VALUE: &str = r#"
const el = document.querySelector(args.selector);
if (!el) return { ok: false, value: null };
const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
el.focus();
setter.call(el, '');
el.dispatchEvent(new Event('input', { bubbles: true }));
setter.call(el, args.value);
el.dispatchEvent(new Event('input', { bubbles: true }));
el.dispatchEvent(new Event('change', { bubbles: true }));
el.blur();
el.focus();
return { ok: el.value === args.value, value: el.value };
"#;

const CLEAR_VALUE: &str = r#"
const el = document.querySelector(args.selector);
if (!el) return { ok: false };
const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, '');
el.dispatchEvent(new Event('input', { bubbles: true }));
el.focus();
return { ok: true };
"#;

const TYPE_CHAR: &str = r#"
const el = document.querySelector(args.selector);
if (!el) return { ok: false };
const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
const key = args.ch;
el.dispatchEvent(new KeyboardEvent('keydown', { key, bubbles: true }));
el.dispatchEvent(new KeyboardEvent('keypress', { key, bubbles: true }));
Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, el.value + key);
el.dispatchEvent(new InputEvent('input', { data: key, inputType: 'insertText', bubbles: true }));
el.dispatchEvent(new KeyboardEvent('keyup', { key, bubbles: true }));
return { ok: true };
"#;

const READ_VALUE: &str = r#"
const el = document.querySelector(args.selector);
if (!el) return { ok: false, value: null };
el.blur();
el.focus();
el.dispatchEvent(new Event('change', { bubbles: true }));
return { ok: true, value: el.value };
"#;

const SUBMIT: &str = r#"
const field = document.querySelector(args.selector);
const controls = Array.from(document.querySelectorAll('button, input[type="submit"], [role="button"]'));
for (const label of args.labels) {
  for (const el of controls) {
    const text = ((el.textContent || '') + ' ' + (el.value || '') + ' ' + (el.getAttribute('aria-label') || '')).trim().toLowerCase();
    if (text === label || text.split(/\s+/).includes(label)) {
      if (el.disabled) el.disabled = false;
      el.click();
      return { method: 'button', label };
    }
  }
}
const form = field ? field.closest('form') : null;
if (form) {
  if (form.requestSubmit) form.requestSubmit(); else form.submit();
  return { method: 'form' };
}
if (field) {
  for (const type of ['keydown', 'keypress', 'keyup']) {
    field.dispatchEvent(new KeyboardEvent(type, { key: 'Enter', code: 'Enter', keyCode: 13, bubbles: true }));
  }
  return { method: 'enter' };
}
return { method: 'none' };
"#;

const INSTALL_NETWORK_MONITOR: &str = r#"
if (window.__stMonitor) return { installed: false, inflight: window.__stMonitor.inflight };
const monitor = { inflight: 0, total: 0 };
window.__stMonitor = monitor;
const origFetch = window.fetch;
if (origFetch) {
  window.fetch = function () {
    monitor.inflight++; monitor.total++;
    return origFetch.apply(this, arguments).finally(() => { monitor.inflight = Math.max(0, monitor.inflight - 1); });
  };
}
const origSend = XMLHttpRequest.prototype.send;
XMLHttpRequest.prototype.send = function () {
  monitor.inflight++; monitor.total++;
  this.addEventListener('loadend', () => { monitor.inflight = Math.max(0, monitor.inflight - 1); });
  return origSend.apply(this, arguments);
};
return { installed: true, inflight: 0 };
"#;

const READ_ACTIVITY: &str = r#"
const m = window.__stMonitor || { inflight: 0, total: 0 };
return { inflight: m.inflight, total: m.total, nodes: document.getElementsByTagName('*').length };
"#;

const PAGE_TEXT: &str = r#"
return (document.body && (document.body.innerText || document.body.textContent)) || '';
"#;

const COLLECT_CANDIDATES: &str = r#"
const out = [];
const seen = new Set();
const describe = el => {
  let sel = el.tagName.toLowerCase();
  if (el.id) sel += '#' + el.id;
  else if (typeof el.className === 'string' && el.className.trim()) sel += '.' + el.className.trim().split(/\s+/).join('.');
  return sel;
};
const push = el => {
  if (seen.has(el)) return;
  seen.add(el);
  const text = (el.innerText || el.textContent || '').trim();
  if (!text) return;
  const style = window.getComputedStyle(el);
  const marker = ((el.id || '') + ' ' + (typeof el.className === 'string' ? el.className : '')).toLowerCase();
  out.push({
    tag: el.tagName.toLowerCase(),
    selector: describe(el),
    text: text.slice(0, 20000),
    monospace: /mono|courier|consolas/i.test(style.fontFamily || ''),
    hint: args.hints.some(h => marker.includes(h)),
  });
};
document.querySelectorAll('pre, code, textarea[readonly]').forEach(push);
for (const h of args.hints) {
  document.querySelectorAll('[class*="' + h + '"], [id*="' + h + '"]').forEach(push);
}
document.querySelectorAll('div, p, section, article').forEach(el => {
  if (el.children.length <= 3 && (el.innerText || '').length > 200) push(el);
});
return out;
"#;

impl DomOp {
    pub fn name(&self) -> &'static str {
        match self {
            DomOp::DismissModals { .. } => "dismiss_modals",
            DomOp::FindInput { .. } => "find_input",
            DomOp::SetValue { .. } => "set_value",
            DomOp::ClearValue { .. } => "clear_value",
            DomOp::TypeChar { .. } => "type_char",
            DomOp::ReadValue { .. } => "read_value",
            DomOp::Submit { .. } => "submit",
            DomOp::InstallNetworkMonitor => "install_network_monitor",
            DomOp::ReadActivity => "read_activity",
            DomOp::PageText => "page_text",
            DomOp::CollectCandidates { .. } => "collect_candidates",
        }
    }

    fn parts(&self) -> (&'static str, Value) {
        match self {
            DomOp::DismissModals {
                patterns,
                close_labels,
            } => (
                DISMISS_MODALS,
                json!({ "patterns": patterns, "close_labels": close_labels }),
            ),
            DomOp::FindInput { hints } => (FIND_INPUT, json!({ "hints": hints })),
            DomOp::SetValue { selector, value } => (SET_VALUE, json!({ "selector": selector, "value": value })),
            DomOp::ClearValue { selector } => (CLEAR_VALUE, json!({ "selector": selector })),
            DomOp::TypeChar { selector, ch } => (TYPE_CHAR, json!({ "selector": selector, "ch": ch.to_string() })),
            DomOp::ReadValue { selector } => (READ_VALUE, json!({ "selector": selector })),
            DomOp::Submit { selector, labels } => (SUBMIT, json!({ "selector": selector, "labels": labels })),
            DomOp::InstallNetworkMonitor => (INSTALL_NETWORK_MONITOR, json!({})),
            DomOp::ReadActivity => (READ_ACTIVITY, json!({})),
            DomOp::PageText => (PAGE_TEXT, json!({})),
            DomOp::CollectCandidates { hints } => (COLLECT_CANDIDATES, json!({ "hints": hints })),
        }
    }

    /// Self-invoking script with arguments inlined as JSON
    pub fn script(&self) -> String {
        let (body, args) = self.parts();
        format!("(function(args) {{{body}}})({args})")
    }
}

/// A single page that automation drives. Not shared between sessions.
#[async_trait]
pub trait PageSurface: Send {
    /// Navigate and wait for load. Fails with `TRANSPORT/PAGE_LOAD_TIMEOUT` past `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), ProviderError>;

    async fn run(&mut self, op: &DomOp) -> Result<Value, ProviderError>;

    async fn close(self: Box<Self>);
}

/// Opens fresh page surfaces
#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PageSurface>, ProviderError>;
}

/// Text clipboard shared by the whole process
#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn write(&self, text: &str) -> Result<(), ProviderError>;

    async fn read(&self) -> Result<String, ProviderError>;
}

/// In-process clipboard, for hosts without a desktop session and for tests
#[derive(Default)]
pub struct MemoryClipboard {
    content: Mutex<String>,
}

#[async_trait]
impl Clipboard for MemoryClipboard {
    async fn write(&self, text: &str) -> Result<(), ProviderError> {
        *self.content.lock().await = text.to_string();
        Ok(())
    }

    async fn read(&self) -> Result<String, ProviderError> {
        Ok(self.content.lock().await.clone())
    }
}

fn clipboard_error(op: &str, err: impl fmt::Display) -> ProviderError {
    ProviderError::new(ErrorKind::Unknown, format!("clipboard {op} failed: {err}"))
}

/// The desktop clipboard through arboard.
///
/// The handle is opened on first use and kept for the life of the process. On X11 the
/// selection is served by its owner, so dropping the handle would drop the content.
#[derive(Default)]
pub struct SystemClipboard {
    handle: Arc<std::sync::Mutex<Option<arboard::Clipboard>>>,
}

impl SystemClipboard {
    async fn with<T, F>(&self, op: &'static str, f: F) -> Result<T, ProviderError>
    where
        T: Send + 'static,
        F: FnOnce(&mut arboard::Clipboard) -> Result<T, arboard::Error> + Send + 'static,
    {
        let handle = Arc::clone(&self.handle);
        tokio::task::spawn_blocking(move || {
            let mut slot = handle.lock().map_err(|_| clipboard_error(op, "handle lock poisoned"))?;
            if slot.is_none() {
                *slot = Some(arboard::Clipboard::new().map_err(|e| clipboard_error(op, e))?);
            }
            let Some(clipboard) = slot.as_mut() else {
                return Err(clipboard_error(op, "no clipboard handle"));
            };
            f(clipboard).map_err(|e| clipboard_error(op, e))
        })
        .await
        .map_err(|e| clipboard_error(op, e))?
    }
}

#[async_trait]
impl Clipboard for SystemClipboard {
    async fn write(&self, text: &str) -> Result<(), ProviderError> {
        let text = text.to_string();
        self.with("write", move |clipboard| clipboard.set_text(text)).await
    }

    async fn read(&self) -> Result<String, ProviderError> {
        self.with("read", |clipboard| clipboard.get_text()).await
    }
}

/// Exclusive right to the page surface and clipboard.
///
/// Only the holder of a `LeaseGuard` may write to either. The guard is dropped the moment a
/// session reaches a terminal phase.
#[derive(Clone)]
pub struct SurfaceLease {
    slot: Arc<Mutex<()>>,
    clipboard: Arc<dyn Clipboard>,
}

pub struct LeaseGuard {
    _slot: OwnedMutexGuard<()>,
    clipboard: Arc<dyn Clipboard>,
}

impl SurfaceLease {
    pub fn new(clipboard: Arc<dyn Clipboard>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(())),
            clipboard,
        }
    }

    /// Wait until no other session holds the surface
    pub async fn acquire(&self) -> LeaseGuard {
        LeaseGuard {
            _slot: self.slot.clone().lock_owned().await,
            clipboard: self.clipboard.clone(),
        }
    }

    pub fn is_held(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}

impl Default for SurfaceLease {
    fn default() -> Self {
        Self::new(Arc::new(SystemClipboard::default()))
    }
}

impl LeaseGuard {
    pub fn clipboard(&self) -> &dyn Clipboard {
        self.clipboard.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_inlines_arguments() {
        let op = DomOp::SetValue {
            selector: "#url".into(),
            value: "https://vm.tiktok.com/ABC123/\"quoted\"".into(),
        };
        let script = op.script();
        assert!(script.starts_with("(function(args) {"));
        assert!(script.ends_with(r##"})({"selector":"#url","value":"https://vm.tiktok.com/ABC123/\"quoted\""})"##));
    }

    #[test]
    fn test_op_names_are_stable() {
        assert_eq!(DomOp::PageText.name(), "page_text");
        assert_eq!(DomOp::InstallNetworkMonitor.name(), "install_network_monitor");
    }

    #[tokio::test]
    async fn test_lease_is_exclusive() {
        let lease = SurfaceLease::new(Arc::new(MemoryClipboard::default()));
        let guard = lease.acquire().await;
        assert!(lease.is_held());

        let waiter = {
            let lease = lease.clone();
            tokio::spawn(async move {
                let _guard = lease.acquire().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(!lease.is_held());
    }

    #[tokio::test]
    async fn test_memory_clipboard_round_trip() {
        let clipboard = MemoryClipboard::default();
        clipboard.write("hello").await.unwrap();
        assert_eq!(clipboard.read().await.unwrap(), "hello");
    }
}
