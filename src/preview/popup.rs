use std::time::Instant;

use reqwest::Url;

use crate::dom::NodeId;
use crate::layout::Placement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PopupId(usize);

impl PopupId {
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupState {
    Hidden,
    PendingShow,
    Visible,
    PendingHide,
}

impl PopupState {
    /// On screen, whether or not a hide is pending.
    pub fn is_visible(self) -> bool {
        matches!(self, Self::Visible | Self::PendingHide)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentStatus {
    Empty,
    Loading,
    Loaded,
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub struct Popup {
    pub id: PopupId,
    pub level: usize,
    pub parent: Option<PopupId>,
    /// Trigger link that owns this popup.
    pub link: NodeId,
    pub element: NodeId,
    pub loading: NodeId,
    pub content: NodeId,
    pub state: PopupState,
    pub stable_until: Option<Instant>,
    pub content_status: ContentStatus,
    pub url: Option<Url>,
    pub title: Option<String>,
    pub placement: Option<Placement>,
}

impl Popup {
    pub fn is_root(&self) -> bool {
        self.level == 0
    }

    pub fn is_stable(&self, now: Instant) -> bool {
        self.stable_until.is_some_and(|until| now < until)
    }
}

/// Arena of every popup created during a page view. Popups are never
/// removed individually; a hidden popup keeps its content for reuse.
#[derive(Debug, Clone, Default)]
pub struct PopupForest {
    popups: Vec<Popup>,
}

impl PopupForest {
    pub fn insert(&mut self, build: impl FnOnce(PopupId) -> Popup) -> PopupId {
        let id = PopupId(self.popups.len());
        self.popups.push(build(id));
        id
    }

    pub fn get(&self, id: PopupId) -> Option<&Popup> {
        self.popups.get(id.0)
    }

    pub fn get_mut(&mut self, id: PopupId) -> Option<&mut Popup> {
        self.popups.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Popup> {
        self.popups.iter()
    }

    pub fn len(&self) -> usize {
        self.popups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.popups.is_empty()
    }

    pub fn clear(&mut self) {
        self.popups.clear();
    }

    pub fn visible(&self) -> Vec<PopupId> {
        self.popups
            .iter()
            .filter(|popup| popup.state.is_visible())
            .map(|popup| popup.id)
            .collect()
    }

    pub fn visible_at_or_above(&self, level: usize) -> Vec<PopupId> {
        self.popups
            .iter()
            .filter(|popup| popup.state.is_visible() && popup.level >= level)
            .map(|popup| popup.id)
            .collect()
    }

    /// `id` and its ancestors, root first.
    pub fn path_to(&self, id: PopupId) -> Vec<PopupId> {
        let mut path: Vec<PopupId> =
            std::iter::successors(Some(id), |current| self.get(*current)?.parent).collect();
        path.reverse();
        path
    }

    /// Whether the visible popups form one chain from a root, each level
    /// present exactly once with a visible parent.
    pub fn is_single_chain(&self) -> bool {
        let mut visible: Vec<&Popup> = self
            .popups
            .iter()
            .filter(|popup| popup.state.is_visible())
            .collect();
        visible.sort_by_key(|popup| popup.level);

        visible.iter().enumerate().all(|(index, popup)| {
            if popup.level != index {
                return false;
            }
            match (index, popup.parent) {
                (0, None) => true,
                (0, Some(_)) => false,
                (_, parent) => parent == Some(visible[index - 1].id),
            }
        })
    }
}
