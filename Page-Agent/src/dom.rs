use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Opaque handle to an element previously located in the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef(pub String);

/// A candidate submit control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitControl {
    pub element: ElementRef,
    pub enabled: bool,
    pub label: String,
}

/// Snapshot of the generation indicators in the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageStatus {
    /// Any loading selector currently matches a visible element.
    pub loading: bool,
    /// Text of the first visible status element, if any.
    pub status_text: Option<String>,
    /// Text of the first visible error element, if any.
    pub error_text: Option<String>,
}

/// DOM primitives the agent needs from the page context.
///
/// Implementations run inside (or remotely against) the target page. The
/// agent never touches the page except through this trait.
#[async_trait]
pub trait PageDom: Send + Sync {
    /// Whether the page-resident helper is installed. `false` after the page
    /// navigated or reloaded.
    async fn is_installed(&self) -> Result<bool>;

    /// Install (or reinstall) the page-resident helper.
    async fn install(&self) -> Result<()>;

    /// First element matching the selectors, in order, that is visible.
    async fn find_first_visible(&self, selectors: &[String]) -> Result<Option<ElementRef>>;

    /// Set the field's value through the framework's native setter path and
    /// dispatch input/change/keyboard events.
    async fn set_value(&self, element: &ElementRef, text: &str) -> Result<()>;

    async fn read_value(&self, element: &ElementRef) -> Result<String>;

    /// Best submit-like control by visible text or ARIA label, preferring
    /// controls inside the input's form or container.
    async fn find_submit_control(
        &self,
        near: &ElementRef,
        texts: &[String],
        labels: &[String],
    ) -> Result<Option<SubmitControl>>;

    async fn click(&self, element: &ElementRef) -> Result<()>;

    /// Synthetic Enter keydown/keypress/keyup on the element.
    async fn press_enter(&self, element: &ElementRef) -> Result<()>;

    /// Submit the element's enclosing form. `false` when there is none.
    async fn submit_form(&self, element: &ElementRef) -> Result<bool>;

    async fn status(
        &self,
        loading_selectors: &[String],
        status_selectors: &[String],
        error_selectors: &[String],
    ) -> Result<PageStatus>;

    /// Visible text of each element matching the selectors.
    async fn visible_texts(&self, selectors: &[String]) -> Result<Vec<String>>;
}
