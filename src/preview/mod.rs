//! Hover-preview lifecycle: which popups exist, which are on screen and when
//! they open or close.
//!
//! The manager is a synchronous state machine. Pointer input arrives through
//! `link_entered`, `link_left` and `pointer_moved`; time only moves when the
//! host calls [`PreviewManager::advance`]. Fetching is left to the host: the
//! manager emits [`PreviewEvent::FetchRequested`] and expects the outcome
//! back through [`PreviewManager::content_loaded`]. [`runtime`] wires all of
//! this to tokio.
//!
//! Visible popups always form a single chain from a root popup (level 0)
//! downwards. Closing a popup closes everything at its level and deeper, and
//! opening one at level `L` first closes whatever is visible at `L` or deeper.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use reqwest::Url;
use tracing::{debug, info, warn};

use crate::config::PreviewSettings;
use crate::dom::{Document, NodeId};
use crate::fetch::{FetchError, PageContent};
use crate::layout::{Placement, Rect, Size, Viewport, place};
use crate::links::{LinkDiscoverer, TriggerLink};
use crate::resolve::UrlResolver;
use crate::session::{Arrival, MemorySessionStore, NavigationGuard, SessionError, SessionStore};

pub mod popup;
pub mod runtime;
pub mod timers;

use self::popup::{ContentStatus, Popup, PopupForest, PopupId, PopupState};
use self::timers::{TimerKey, TimerPurpose, TimerQueue, TimerTarget};

pub const POPUP_CLASS: &str = "hover-preview";
pub const LOADING_CLASS: &str = "hover-preview-loading";
pub const CONTENT_CLASS: &str = "hover-preview-content";
pub const ERROR_CLASS: &str = "preview-error";
pub const OPENED_UPWARD_CLASS: &str = "opened-upward";
pub const LEVEL_ATTR: &str = "data-level";

/// Layout information only the host can provide.
pub trait Geometry {
    /// Viewport-relative box of a trigger link, `None` when not laid out.
    fn anchor_rect(&self, document: &Document, node: NodeId) -> Option<Rect>;
    fn popup_size(&self, document: &Document, popup: NodeId) -> Size;
}

/// Fixed anchor boxes registered up front and a single popup size.
#[derive(Debug, Clone)]
pub struct StaticGeometry {
    anchors: HashMap<NodeId, Rect>,
    popup_size: Size,
}

impl StaticGeometry {
    pub fn new(popup_size: Size) -> Self {
        Self {
            anchors: HashMap::new(),
            popup_size,
        }
    }

    pub fn with_anchor(mut self, node: NodeId, rect: Rect) -> Self {
        self.anchors.insert(node, rect);
        self
    }
}

impl Geometry for StaticGeometry {
    fn anchor_rect(&self, _document: &Document, node: NodeId) -> Option<Rect> {
        self.anchors.get(&node).copied()
    }

    fn popup_size(&self, _document: &Document, _popup: NodeId) -> Size {
        self.popup_size
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreviewEvent {
    FetchRequested {
        popup: PopupId,
        url: Url,
    },
    PopupShown {
        popup: PopupId,
        link: NodeId,
        level: usize,
        placement: Option<Placement>,
    },
    PopupHidden {
        popup: PopupId,
        level: usize,
    },
    ContentReady {
        popup: PopupId,
        html: String,
        title: Option<String>,
        status: ContentStatus,
    },
    ForestCleared,
}

#[derive(Debug, Default)]
struct HoverState {
    hovered: HashSet<PopupId>,
    /// Trigger links whose popup is currently on screen.
    active_links: HashMap<NodeId, PopupId>,
    last_target: Option<NodeId>,
}

impl HoverState {
    fn is_empty(&self) -> bool {
        self.hovered.is_empty() && self.active_links.is_empty() && self.last_target.is_none()
    }
}

pub struct PreviewManager {
    document: Document,
    resolver: UrlResolver,
    discoverer: LinkDiscoverer,
    settings: PreviewSettings,
    geometry: Box<dyn Geometry + Send>,
    session: Box<dyn SessionStore + Send>,
    viewport: Viewport,
    popups: PopupForest,
    popup_by_link: HashMap<NodeId, PopupId>,
    popup_by_element: HashMap<NodeId, PopupId>,
    links: HashSet<NodeId>,
    hover: HoverState,
    timers: TimerQueue,
    events: Vec<PreviewEvent>,
}

impl PreviewManager {
    pub fn init(document: Document, page_url: Url, settings: PreviewSettings) -> Self {
        let resolver = UrlResolver::new(page_url, &settings.resolver);
        let geometry = StaticGeometry::new(settings.popup_size);
        Self {
            document,
            resolver,
            discoverer: LinkDiscoverer::new(),
            settings,
            geometry: Box::new(geometry),
            session: Box::new(MemorySessionStore::default()),
            viewport: Viewport::default(),
            popups: PopupForest::default(),
            popup_by_link: HashMap::new(),
            popup_by_element: HashMap::new(),
            links: HashSet::new(),
            hover: HoverState::default(),
            timers: TimerQueue::default(),
            events: Vec::new(),
        }
    }

    pub fn with_geometry(mut self, geometry: Box<dyn Geometry + Send>) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_session(mut self, session: Box<dyn SessionStore + Send>) -> Self {
        self.session = session;
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Consumes the navigation flag, drops popups carried over from the
    /// previous page and wires every trigger link in the body.
    pub fn start(&mut self) -> Result<Arrival, SessionError> {
        let arrival = NavigationGuard::consume(self.session.as_mut())?;
        if arrival == Arrival::FollowedLink {
            let removed = self.remove_stale_popups();
            debug!(removed, "suppressed popups carried over from previous page");
        }

        let body = self.document.body();
        let wired = self.content_inserted(body);
        info!(
            page = %self.resolver.page(),
            links = wired,
            arrival = ?arrival,
            "hover previews ready"
        );
        Ok(arrival)
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn session(&self) -> &dyn SessionStore {
        self.session.as_ref()
    }

    pub fn popup(&self, id: PopupId) -> Option<&Popup> {
        self.popups.get(id)
    }

    pub fn popup_for_link(&self, link: NodeId) -> Option<&Popup> {
        self.popup_by_link
            .get(&link)
            .and_then(|id| self.popups.get(*id))
    }

    pub fn visible_popups(&self) -> Vec<PopupId> {
        self.popups.visible()
    }

    pub fn is_trigger_link(&self, node: NodeId) -> bool {
        self.links.contains(&node)
    }

    /// Trigger links inside a subtree, in document order.
    pub fn trigger_links_in(&self, root: NodeId) -> Vec<NodeId> {
        self.document
            .descendants(root)
            .into_iter()
            .filter(|node| self.links.contains(node))
            .collect()
    }

    pub fn active_link_count(&self) -> usize {
        self.hover.active_links.len()
    }

    pub fn hover_state_is_empty(&self) -> bool {
        self.hover.is_empty()
    }

    pub fn pending_timer_count(&self) -> usize {
        self.timers.len()
    }

    pub fn is_single_chain(&self) -> bool {
        self.popups.is_single_chain()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn drain_events(&mut self) -> Vec<PreviewEvent> {
        std::mem::take(&mut self.events)
    }

    /// New markup was spliced in under `root`; wires its trigger links.
    pub fn content_inserted(&mut self, root: NodeId) -> usize {
        let wired = self.discoverer.discover(&mut self.document, root);
        let count = wired.len();
        self.links.extend(wired);
        count
    }

    pub fn link_entered(&mut self, link: NodeId, now: Instant) {
        if !self.links.contains(&link) {
            return;
        }
        self.hover.last_target = Some(link);
        self.cancel_pending_shows();

        if self.live_popup_for_link(link).is_some() {
            self.apply_hover_path(now);
            return;
        }

        let nested = self.containing_popup(link).is_some();
        let delay = if nested {
            self.settings.timing.nested_show_delay
        } else {
            self.settings.timing.show_delay
        };
        if let Some(popup) = self.popup_by_link.get(&link).copied()
            && let Some(popup) = self.popups.get_mut(popup)
        {
            popup.state = PopupState::PendingShow;
        }
        self.timers.schedule(TimerKey::show_link(link), now + delay);
        debug!(
            link = link.index(),
            nested,
            delay_ms = delay.as_millis() as u64,
            "scheduled preview show"
        );
    }

    pub fn link_left(&mut self, link: NodeId, related: Option<NodeId>, now: Instant) {
        if !self.links.contains(&link) {
            return;
        }
        if self.timers.cancel(TimerKey::show_link(link)) {
            self.reset_pending_show(link);
            debug!(link = link.index(), "cancelled preview show");
        }
        self.hover.last_target = related;

        let Some(popup) = self.live_popup_for_link(link) else {
            return;
        };
        if let Some(target) = related
            && self.target_within_chain(target, popup)
        {
            return;
        }
        self.schedule_hide(popup, now);
    }

    pub fn pointer_moved(&mut self, target: Option<NodeId>, now: Instant) {
        self.hover.last_target = target;
        self.apply_hover_path(now);
    }

    /// Following a link tears everything down and leaves a flag for the
    /// next page load.
    pub fn link_activated(&mut self, link: NodeId) -> Result<(), SessionError> {
        debug!(link = link.index(), "link activated");
        self.teardown_all();
        NavigationGuard::record_navigation(self.session.as_mut())
    }

    pub fn viewport_resized(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        let root = self
            .popups
            .visible()
            .into_iter()
            .find(|id| self.popups.get(*id).is_some_and(Popup::is_root));
        if let Some(root) = root {
            debug!(popup = root.index(), "viewport resized; hiding root preview");
            self.hide_cascade(root);
        }
    }

    /// Drops every popup and all hover state; nothing survives the page.
    pub fn page_unloaded(&mut self) {
        self.teardown_all();
        for popup in self.popups.iter() {
            self.document.detach(popup.element);
        }
        self.popups.clear();
        self.popup_by_link.clear();
        self.popup_by_element.clear();
    }

    pub fn advance(&mut self, now: Instant) {
        while let Some(key) = self.timers.pop_due(now) {
            match (key.target, key.purpose) {
                (TimerTarget::Link(link), TimerPurpose::Show) => self.fire_show(link, now),
                (TimerTarget::Popup(popup), TimerPurpose::Hide) => self.fire_hide(popup, now),
                (TimerTarget::Forest, TimerPurpose::Hide) => self.fire_hide_forest(now),
                (target, purpose) => {
                    warn!(?target, ?purpose, "ignoring unexpected timer");
                }
            }
        }
    }

    /// Splices fetched content (or an inline error) into the popup. The
    /// content is kept even when the popup was closed in the meantime.
    pub fn content_loaded(
        &mut self,
        popup_id: PopupId,
        url: &Url,
        result: Result<PageContent, FetchError>,
        _now: Instant,
    ) {
        let Some(popup) = self.popups.get(popup_id) else {
            warn!(popup = popup_id.index(), "content arrived for unknown popup");
            return;
        };
        if popup.url.as_ref() != Some(url) {
            debug!(popup = popup_id.index(), url = %url, "discarding stale preview content");
            return;
        }
        let (content, loading, link) = (popup.content, popup.loading, popup.link);
        let visible = popup.state.is_visible();

        self.clear_content(content);
        let (status, title) = match result {
            Ok(page) => {
                self.document.append_html(content, &page.html);
                (ContentStatus::Loaded, page.title)
            }
            Err(error) => {
                debug!(popup = popup_id.index(), error = %error, "preview failed");
                let message = error.user_message();
                let notice = self.document.create_element("div");
                self.document.add_class(notice, ERROR_CLASS);
                let text = self.document.create_text(message);
                self.document.append_child(notice, text);
                self.document.append_child(content, notice);
                (
                    ContentStatus::Failed {
                        message: message.to_owned(),
                    },
                    None,
                )
            }
        };
        self.document.set_attr(loading, "hidden", "");

        if let Some(popup) = self.popups.get_mut(popup_id) {
            popup.content_status = status.clone();
            popup.title = title.clone();
        }
        if status == ContentStatus::Loaded {
            self.content_inserted(content);
        }

        if visible && self.document.is_attached(link) {
            self.reposition(popup_id);
        } else {
            debug!(
                popup = popup_id.index(),
                "trigger link no longer on screen; cached content without repositioning"
            );
        }

        self.events.push(PreviewEvent::ContentReady {
            popup: popup_id,
            html: self.document.inner_html(content),
            title,
            status,
        });
    }

    /// Hides every popup and resets hover tracking and timers, pending
    /// shows included.
    pub fn teardown_all(&mut self) {
        self.close_forest();
        self.timers.clear();
        let pending: Vec<NodeId> = self
            .popups
            .iter()
            .filter(|popup| popup.state == PopupState::PendingShow)
            .map(|popup| popup.link)
            .collect();
        for link in pending {
            self.reset_pending_show(link);
        }
        self.hover = HoverState::default();
    }

    /// Hides every popup. A show still waiting on its delay survives, and so
    /// does the last pointer target.
    fn close_forest(&mut self) {
        let mut visible = self.popups.visible();
        let had_visible = !visible.is_empty();
        visible.sort_by_key(|id| {
            std::cmp::Reverse(self.popups.get(*id).map(|popup| popup.level).unwrap_or(0))
        });
        for id in visible {
            self.close_popup(id);
        }

        self.timers
            .cancel_where(|key| key.purpose == TimerPurpose::Hide);
        self.hover.hovered.clear();
        self.hover.active_links.clear();

        if had_visible {
            debug!("tore down preview forest");
            self.events.push(PreviewEvent::ForestCleared);
        }
    }

    fn fire_show(&mut self, link: NodeId, now: Instant) {
        if !self.document.is_attached(link) {
            debug!(link = link.index(), "trigger link detached before show; skipping");
            self.reset_pending_show(link);
            return;
        }

        let parent = self.containing_popup(link);
        let parent_level = match parent {
            Some(parent_id) => match self.popups.get(parent_id) {
                Some(parent_popup) if parent_popup.state.is_visible() => Some(parent_popup.level),
                _ => {
                    debug!(link = link.index(), "parent preview closed before show; skipping");
                    self.reset_pending_show(link);
                    return;
                }
            },
            None => None,
        };
        let level = parent_level.map_or(0, |parent_level| parent_level + 1);

        if level == 0 {
            if !self.popups.visible().is_empty() {
                self.close_forest();
            }
        } else {
            self.close_levels_from(level);
        }

        let popup_id = self.ensure_popup(link, parent, level);
        let target = TriggerLink::from_node(&self.document, link)
            .map(|trigger| trigger.raw_target())
            .unwrap_or_default();
        let url = self.resolver.resolve(&target);

        let stable_until = now + self.settings.timing.stable_grace;
        let Some(popup) = self.popups.get_mut(popup_id) else {
            return;
        };
        popup.state = PopupState::Visible;
        popup.stable_until = Some(stable_until);
        // Loaded content is cached; a fetch still in flight will land here too.
        let reuse = popup.url.as_ref() == Some(&url)
            && matches!(
                popup.content_status,
                ContentStatus::Loaded | ContentStatus::Loading
            );
        let in_flight = reuse && popup.content_status == ContentStatus::Loading;
        if !reuse {
            popup.url = Some(url.clone());
            popup.content_status = ContentStatus::Loading;
            popup.title = None;
        }
        let (element, loading, content) = (popup.element, popup.loading, popup.content);

        let body = self.document.body();
        self.document.append_child(body, element);
        self.document.set_attr(element, LEVEL_ATTR, &level.to_string());
        if !reuse {
            self.clear_content(content);
            self.document.remove_attr(loading, "hidden");
            self.events.push(PreviewEvent::FetchRequested {
                popup: popup_id,
                url: url.clone(),
            });
        }

        for ancestor in self.popups.path_to(popup_id) {
            if let Some(ancestor) = self.popups.get_mut(ancestor) {
                let extended = ancestor
                    .stable_until
                    .map_or(stable_until, |until| until.max(stable_until));
                ancestor.stable_until = Some(extended);
            }
        }
        self.hover.active_links.insert(link, popup_id);
        self.reposition(popup_id);

        let placement = self.popups.get(popup_id).and_then(|popup| popup.placement);
        self.events.push(PreviewEvent::PopupShown {
            popup: popup_id,
            link,
            level,
            placement,
        });
        debug!(
            popup = popup_id.index(),
            level,
            url = %url,
            cached = reuse && !in_flight,
            in_flight,
            "showing preview"
        );

        self.apply_hover_path(now);
        debug_assert!(self.popups.is_single_chain());
    }

    fn fire_hide(&mut self, popup_id: PopupId, now: Instant) {
        let Some(popup) = self.popups.get(popup_id) else {
            return;
        };
        if !popup.state.is_visible() {
            return;
        }
        if self.hover.hovered.contains(&popup_id) {
            if let Some(popup) = self.popups.get_mut(popup_id) {
                popup.state = PopupState::Visible;
            }
            return;
        }
        if let Some(until) = popup.stable_until
            && now < until
        {
            self.timers.schedule(TimerKey::hide_popup(popup_id), until);
            return;
        }
        self.hide_cascade(popup_id);
    }

    fn fire_hide_forest(&mut self, now: Instant) {
        if !self.hover.hovered.is_empty() {
            return;
        }
        let stable_until = self
            .popups
            .iter()
            .filter(|popup| popup.state.is_visible())
            .filter_map(|popup| popup.stable_until)
            .filter(|until| now < *until)
            .max();
        if let Some(until) = stable_until {
            self.timers.schedule(TimerKey::hide_forest(), until);
            return;
        }
        self.close_forest();
    }

    /// Recomputes which popups the last pointer target keeps alive and
    /// schedules hides for the rest.
    fn apply_hover_path(&mut self, now: Instant) {
        let visible = self.popups.visible();
        if visible.is_empty() {
            return;
        }
        let path = self
            .hover
            .last_target
            .map(|target| self.hover_path(target))
            .unwrap_or_default();

        if path.is_empty() {
            self.hover.hovered.clear();
            for id in &visible {
                self.timers.cancel(TimerKey::hide_popup(*id));
                if let Some(popup) = self.popups.get_mut(*id) {
                    popup.state = PopupState::PendingHide;
                }
            }
            let deadline = now + self.settings.timing.hide_delay;
            if self.timers.schedule_if_absent(TimerKey::hide_forest(), deadline) {
                debug!(visible = visible.len(), "pointer left all previews; scheduled hide");
            }
            return;
        }

        self.timers.cancel(TimerKey::hide_forest());
        for id in visible {
            if path.contains(&id) {
                self.hover.hovered.insert(id);
                self.timers.cancel(TimerKey::hide_popup(id));
                if let Some(popup) = self.popups.get_mut(id) {
                    popup.state = PopupState::Visible;
                }
            } else {
                self.hover.hovered.remove(&id);
                self.schedule_hide(id, now);
            }
        }
    }

    /// Visible popups, root first, kept alive by a pointer over `target`.
    fn hover_path(&self, target: NodeId) -> Vec<PopupId> {
        let over_link = std::iter::once(target)
            .chain(self.document.ancestors(target))
            .find(|node| self.links.contains(node))
            .and_then(|link| self.live_popup_for_link(link));
        let leaf = over_link.or_else(|| {
            self.containing_popup(target)
                .filter(|id| self.is_visible(*id))
        });

        leaf.map(|leaf| {
            self.popups
                .path_to(leaf)
                .into_iter()
                .filter(|id| self.is_visible(*id))
                .collect()
        })
        .unwrap_or_default()
    }

    fn schedule_hide(&mut self, popup_id: PopupId, now: Instant) {
        let Some(popup) = self.popups.get_mut(popup_id) else {
            return;
        };
        if !popup.state.is_visible() {
            return;
        }
        let mut deadline = now + self.settings.timing.hide_delay;
        if let Some(until) = popup.stable_until {
            deadline = deadline.max(until);
        }
        popup.state = PopupState::PendingHide;
        if self
            .timers
            .schedule_if_absent(TimerKey::hide_popup(popup_id), deadline)
        {
            debug!(popup = popup_id.index(), "scheduled preview hide");
        }
    }

    /// Closes `popup_id` and everything nested below it; closing a root
    /// closes the whole forest.
    fn hide_cascade(&mut self, popup_id: PopupId) {
        let Some(level) = self.popups.get(popup_id).map(|popup| popup.level) else {
            return;
        };
        if level == 0 {
            self.close_forest();
        } else {
            self.close_levels_from(level);
        }
    }

    fn close_levels_from(&mut self, level: usize) {
        let mut doomed = self.popups.visible_at_or_above(level);
        doomed.sort_by_key(|id| {
            std::cmp::Reverse(self.popups.get(*id).map(|popup| popup.level).unwrap_or(0))
        });
        for id in doomed {
            self.close_popup(id);
        }
    }

    fn close_popup(&mut self, popup_id: PopupId) {
        let Some(popup) = self.popups.get_mut(popup_id) else {
            return;
        };
        if !popup.state.is_visible() {
            return;
        }
        popup.state = PopupState::Hidden;
        popup.stable_until = None;
        let (element, link, level) = (popup.element, popup.link, popup.level);

        self.document.detach(element);
        self.hover.hovered.remove(&popup_id);
        self.hover.active_links.remove(&link);
        self.timers.cancel(TimerKey::hide_popup(popup_id));
        self.events.push(PreviewEvent::PopupHidden {
            popup: popup_id,
            level,
        });
        debug!(popup = popup_id.index(), level, "hid preview");
    }

    /// Empties a popup's content and forgets the trigger links that lived in
    /// it. The detached nodes stay in the document arena until the page goes.
    fn clear_content(&mut self, content: NodeId) {
        let orphaned = self.trigger_links_in(content);
        let mut nested_level: Option<usize> = None;
        for link in &orphaned {
            self.links.remove(link);
            self.timers.cancel(TimerKey::show_link(*link));
            let Some(popup_id) = self.popup_by_link.remove(link) else {
                continue;
            };
            if let Some(popup) = self.popups.get(popup_id) {
                self.popup_by_element.remove(&popup.element);
                if popup.state.is_visible() {
                    nested_level =
                        Some(nested_level.map_or(popup.level, |level| level.min(popup.level)));
                }
            }
        }
        if let Some(level) = nested_level {
            self.close_levels_from(level);
        }
        self.document.clear_children(content);
        if !orphaned.is_empty() {
            debug!(links = orphaned.len(), "forgot trigger links of replaced content");
        }
    }

    fn ensure_popup(&mut self, link: NodeId, parent: Option<PopupId>, level: usize) -> PopupId {
        if let Some(existing) = self.popup_by_link.get(&link).copied()
            && let Some(popup) = self.popups.get_mut(existing)
        {
            popup.parent = parent;
            popup.level = level;
            return existing;
        }

        let element = self.document.create_element("div");
        self.document.add_class(element, POPUP_CLASS);
        let loading = self.document.create_element("div");
        self.document.add_class(loading, LOADING_CLASS);
        self.document.append_child(element, loading);
        let content = self.document.create_element("div");
        self.document.add_class(content, CONTENT_CLASS);
        self.document.append_child(element, content);

        let id = self.popups.insert(|id| Popup {
            id,
            level,
            parent,
            link,
            element,
            loading,
            content,
            state: PopupState::Hidden,
            stable_until: None,
            content_status: ContentStatus::Empty,
            url: None,
            title: None,
            placement: None,
        });
        self.popup_by_link.insert(link, id);
        self.popup_by_element.insert(element, id);
        id
    }

    fn reposition(&mut self, popup_id: PopupId) {
        let Some(popup) = self.popups.get(popup_id) else {
            return;
        };
        let (link, element) = (popup.link, popup.element);
        let Some(anchor) = self.geometry.anchor_rect(&self.document, link) else {
            return;
        };
        let size = self.geometry.popup_size(&self.document, element);
        let placement = place(size, anchor, &self.viewport, &self.settings.placement);

        let mut style = format!("top: {}px; left: {}px;", placement.y, placement.x);
        if let Some(max_height) = placement.max_height {
            style.push_str(&format!(" max-height: {max_height}px; overflow-y: auto;"));
        }
        self.document.set_attr(element, "style", &style);
        if placement.opened_upward {
            self.document.add_class(element, OPENED_UPWARD_CLASS);
        } else {
            self.document.remove_class(element, OPENED_UPWARD_CLASS);
        }
        if let Some(popup) = self.popups.get_mut(popup_id) {
            popup.placement = Some(placement);
        }
    }

    fn containing_popup(&self, node: NodeId) -> Option<PopupId> {
        std::iter::once(node)
            .chain(self.document.ancestors(node))
            .find_map(|ancestor| self.popup_by_element.get(&ancestor).copied())
    }

    fn live_popup_for_link(&self, link: NodeId) -> Option<PopupId> {
        self.hover
            .active_links
            .get(&link)
            .copied()
            .filter(|id| self.is_visible(*id))
    }

    fn is_visible(&self, popup_id: PopupId) -> bool {
        self.popups
            .get(popup_id)
            .is_some_and(|popup| popup.state.is_visible())
    }

    /// Whether `target` sits in `popup_id`, one of its ancestors or one of
    /// its descendants.
    fn target_within_chain(&self, target: NodeId, popup_id: PopupId) -> bool {
        let Some(containing) = self.containing_popup(target) else {
            return false;
        };
        self.popups.path_to(containing).contains(&popup_id)
            || self.popups.path_to(popup_id).contains(&containing)
    }

    fn cancel_pending_shows(&mut self) {
        self.timers
            .cancel_where(|key| key.purpose == TimerPurpose::Show);
        let pending: Vec<NodeId> = self
            .popups
            .iter()
            .filter(|popup| popup.state == PopupState::PendingShow)
            .map(|popup| popup.link)
            .collect();
        for link in pending {
            self.reset_pending_show(link);
        }
    }

    fn reset_pending_show(&mut self, link: NodeId) {
        if let Some(popup) = self.popup_by_link.get(&link).copied()
            && let Some(popup) = self.popups.get_mut(popup)
            && popup.state == PopupState::PendingShow
        {
            popup.state = PopupState::Hidden;
        }
    }

    fn remove_stale_popups(&mut self) -> usize {
        let body = self.document.body();
        let stale = self
            .document
            .select(body, |element| element.has_class(POPUP_CLASS));
        for node in &stale {
            self.document.detach(*node);
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests;
