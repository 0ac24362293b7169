use std::time::{Duration, Instant};

use reqwest::Url;

use crate::config::PreviewSettings;
use crate::dom::{Document, NodeId};
use crate::fetch::{FetchError, PageContent};
use crate::layout::{Rect, Size, Viewport};
use crate::session::{
    Arrival, MemorySessionStore, NAVIGATION_FLAG_KEY, NavigationGuard, SessionStore,
};

use super::popup::{ContentStatus, PopupId, PopupState};
use super::{
    ERROR_CLASS, LEVEL_ATTR, POPUP_CLASS, PreviewEvent, PreviewManager, StaticGeometry,
};

const PAGE_URL: &str = "https://site.io/Repo/index.html";
const PAGE_HTML: &str = r#"<html><body>
    <p>Start at <a class="internal-link" href="alpha">Alpha</a> or <a href="https://other.io/x">away</a>.</p>
    <p id="blank">Nothing to hover here.</p>
</body></html>"#;

const TWO_LINK_HTML: &str = r#"<html><body>
    <p><a class="internal-link" href="alpha">Alpha</a> and <a class="internal-link" href="beta">Beta</a></p>
</body></html>"#;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn manager_for(html: &str) -> PreviewManager {
    let page = Url::parse(PAGE_URL).expect("page url should parse");
    let mut manager = PreviewManager::init(Document::parse(html), page, PreviewSettings::default());
    manager.start().expect("start should succeed");
    manager
}

fn link_named(manager: &PreviewManager, text: &str) -> NodeId {
    let document = manager.document();
    document
        .select(document.root(), |element| element.name() == "a")
        .into_iter()
        .find(|node| document.text_content(*node) == text)
        .expect("link should exist")
}

fn take_fetch(manager: &mut PreviewManager) -> (PopupId, Url) {
    manager
        .drain_events()
        .into_iter()
        .find_map(|event| match event {
            PreviewEvent::FetchRequested { popup, url } => Some((popup, url)),
            _ => None,
        })
        .expect("a fetch should have been requested")
}

fn loaded(url: &Url, html: &str) -> Result<PageContent, FetchError> {
    Ok(PageContent {
        url: url.clone(),
        html: html.to_owned(),
        title: Some("Preview".to_owned()),
    })
}

/// Hovers `link` until its popup shows and feeds it `html`.
fn open(manager: &mut PreviewManager, link: NodeId, now: Instant, html: &str) -> (PopupId, Instant) {
    manager.pointer_moved(Some(link), now);
    manager.link_entered(link, now);
    let shown_at = now + ms(500);
    manager.advance(shown_at);
    let (popup, url) = take_fetch(manager);
    manager.content_loaded(popup, &url, loaded(&url, html), shown_at);
    manager.drain_events();
    (popup, shown_at)
}

fn nested_link(manager: &PreviewManager, popup: PopupId) -> NodeId {
    let content = manager.popup(popup).expect("popup should exist").content;
    manager
        .trigger_links_in(content)
        .into_iter()
        .next()
        .expect("popup content should contain a trigger link")
}

#[test]
fn hovering_then_leaving_before_delay_never_creates_popup() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    let start = Instant::now();

    manager.link_entered(alpha, start);
    manager.link_left(alpha, None, start + ms(100));
    manager.advance(start + ms(1_000));

    assert!(manager.popup_for_link(alpha).is_none());
    assert!(manager.visible_popups().is_empty());
    assert!(manager.drain_events().is_empty());
}

#[test]
fn external_links_are_not_wired() {
    let manager = manager_for(PAGE_HTML);
    let away = link_named(&manager, "away");
    assert!(!manager.is_trigger_link(away));
    assert!(manager.is_trigger_link(link_named(&manager, "Alpha")));
}

#[test]
fn root_preview_shows_after_show_delay_and_requests_content() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    let start = Instant::now();

    manager.link_entered(alpha, start);
    manager.advance(start + ms(299));
    assert!(manager.drain_events().is_empty());

    manager.advance(start + ms(300));
    let events = manager.drain_events();
    let requested = events.iter().find_map(|event| match event {
        PreviewEvent::FetchRequested { url, .. } => Some(url.clone()),
        _ => None,
    });
    assert_eq!(
        requested.as_ref().map(Url::as_str),
        Some("https://site.io/Repo/alpha")
    );
    assert!(events.iter().any(|event| matches!(
        event,
        PreviewEvent::PopupShown { link, level: 0, .. } if *link == alpha
    )));

    let popup = manager.popup_for_link(alpha).expect("popup should exist");
    let document = manager.document();
    assert_eq!(popup.state, PopupState::Visible);
    assert_eq!(popup.content_status, ContentStatus::Loading);
    assert!(document.is_attached(popup.element));
    assert!(document.has_class(popup.element, POPUP_CLASS));
    assert_eq!(document.attr(popup.element, LEVEL_ATTR), Some("0"));
    assert_eq!(document.attr(popup.loading, "hidden"), None);
}

#[test]
fn popup_is_placed_below_its_anchor() {
    let page = Url::parse(PAGE_URL).expect("page url should parse");
    let document = Document::parse(PAGE_HTML);
    let mut manager = PreviewManager::init(document, page, PreviewSettings::default());
    manager.start().expect("start should succeed");
    let alpha = link_named(&manager, "Alpha");
    let geometry = StaticGeometry::new(Size {
        width: 500.0,
        height: 400.0,
    })
    .with_anchor(
        alpha,
        Rect {
            x: 100.0,
            y: 100.0,
            width: 80.0,
            height: 20.0,
        },
    );
    let mut manager = manager.with_geometry(Box::new(geometry));
    let start = Instant::now();

    manager.link_entered(alpha, start);
    manager.advance(start + ms(300));

    let popup = manager.popup_for_link(alpha).expect("popup should exist");
    let placement = popup.placement.expect("anchored popup should be placed");
    assert_eq!(placement.y, 130.0);
    assert_eq!(placement.x, 10.0);
    assert!(!placement.opened_upward);
    let style = manager
        .document()
        .attr(popup.element, "style")
        .expect("style should be set");
    assert!(style.contains("top: 130px"));
}

#[test]
fn nested_chain_keeps_ancestors_and_closes_descendants() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    let start = Instant::now();

    let (a, a_at) = open(
        &mut manager,
        alpha,
        start,
        r#"<p>Go to <a class="internal-link" href="beta">Beta</a>.</p>"#,
    );
    let beta = nested_link(&manager, a);
    let (b, b_at) = open(
        &mut manager,
        beta,
        a_at + ms(1_000),
        r#"<p>Then <a class="internal-link" href="gamma">Gamma</a>.</p>"#,
    );
    let gamma = nested_link(&manager, b);
    let (c, c_at) = open(&mut manager, gamma, b_at + ms(1_000), "<p>Leaf.</p>");

    assert_eq!(manager.visible_popups().len(), 3);
    assert!(manager.is_single_chain());
    assert_eq!(manager.popup(b).expect("b exists").parent, Some(a));
    assert_eq!(manager.popup(c).expect("c exists").parent, Some(b));
    assert_eq!(manager.popup(c).expect("c exists").level, 2);

    let c_content = manager.popup(c).expect("c exists").content;
    manager.pointer_moved(Some(c_content), c_at + ms(1_000));
    manager.advance(c_at + ms(5_000));
    assert_eq!(manager.visible_popups().len(), 3);

    let a_content = manager.popup(a).expect("a exists").content;
    let moved_at = c_at + ms(6_000);
    manager.pointer_moved(Some(a_content), moved_at);
    manager.advance(moved_at + ms(300));

    assert_eq!(manager.visible_popups(), vec![a]);
    let hidden: Vec<usize> = manager
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            PreviewEvent::PopupHidden { level, .. } => Some(level),
            _ => None,
        })
        .collect();
    assert_eq!(hidden, vec![2, 1]);
    assert!(manager.is_single_chain());
}

#[test]
fn opening_a_sibling_closes_the_previous_branch() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    let start = Instant::now();

    let (a, a_at) = open(
        &mut manager,
        alpha,
        start,
        r#"<p><a class="internal-link" href="one">One</a> <a class="internal-link" href="two">Two</a></p>"#,
    );
    let content = manager.popup(a).expect("a exists").content;
    let links = manager.trigger_links_in(content);
    assert_eq!(links.len(), 2);

    let (first, first_at) = open(&mut manager, links[0], a_at + ms(1_000), "<p>One.</p>");
    manager.link_left(links[0], Some(links[1]), first_at + ms(10));
    let (second, _) = open(&mut manager, links[1], first_at + ms(20), "<p>Two.</p>");

    assert_eq!(manager.visible_popups(), vec![a, second]);
    assert_eq!(
        manager.popup(first).expect("first exists").state,
        PopupState::Hidden
    );
    assert!(manager.is_single_chain());
}

#[test]
fn leaving_the_whole_chain_hides_everything_after_hide_delay() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    let start = Instant::now();

    let (a, a_at) = open(
        &mut manager,
        alpha,
        start,
        r#"<p>Go to <a class="internal-link" href="beta">Beta</a>.</p>"#,
    );
    let beta = nested_link(&manager, a);
    let (_, b_at) = open(&mut manager, beta, a_at + ms(1_000), "<p>Leaf.</p>");

    let left_at = b_at + ms(1_000);
    manager.link_left(beta, None, left_at);
    manager.pointer_moved(None, left_at);

    manager.advance(left_at + ms(299));
    assert_eq!(manager.visible_popups().len(), 2);

    manager.advance(left_at + ms(300));
    assert!(manager.visible_popups().is_empty());
    assert!(manager.hover_state_is_empty());
    assert_eq!(manager.active_link_count(), 0);
    assert_eq!(manager.pending_timer_count(), 0);
    assert!(manager.drain_events().contains(&PreviewEvent::ForestCleared));
}

#[test]
fn new_popup_is_protected_by_stable_grace() {
    let mut settings = PreviewSettings::default();
    settings.timing.hide_delay = ms(50);
    settings.timing.stable_grace = ms(400);
    let page = Url::parse(PAGE_URL).expect("page url should parse");
    let mut manager = PreviewManager::init(Document::parse(PAGE_HTML), page, settings);
    manager.start().expect("start should succeed");
    let alpha = link_named(&manager, "Alpha");
    let start = Instant::now();

    manager.link_entered(alpha, start);
    manager.advance(start + ms(300));
    manager.link_left(alpha, None, start + ms(310));
    manager.pointer_moved(None, start + ms(310));

    manager.advance(start + ms(500));
    assert_eq!(manager.visible_popups().len(), 1);

    manager.advance(start + ms(700));
    assert!(manager.visible_popups().is_empty());
}

#[test]
fn missing_page_renders_inline_not_found_message() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    let start = Instant::now();

    manager.link_entered(alpha, start);
    manager.advance(start + ms(300));
    let (popup, url) = take_fetch(&mut manager);
    manager.content_loaded(
        popup,
        &url,
        Err(FetchError::NotFound { url: url.clone() }),
        start + ms(350),
    );

    let popup = manager.popup(popup).expect("popup should exist");
    let document = manager.document();
    assert_eq!(
        popup.content_status,
        ContentStatus::Failed {
            message: "Page not found".to_owned()
        }
    );
    assert_eq!(document.text_content(popup.content), "Page not found");
    assert_eq!(
        document
            .select(popup.content, |element| element.has_class(ERROR_CLASS))
            .len(),
        1
    );
    assert_eq!(document.attr(popup.loading, "hidden"), Some(""));
    assert_eq!(popup.state, PopupState::Visible);
}

#[test]
fn viewport_resize_hides_all_popups() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    let (_, shown_at) = open(&mut manager, alpha, Instant::now(), "<p>Body.</p>");
    assert_eq!(manager.visible_popups().len(), 1);

    manager.viewport_resized(Viewport {
        width: 640.0,
        height: 480.0,
        scroll_x: 0.0,
        scroll_y: 0.0,
    });
    manager.advance(shown_at + ms(10_000));

    assert!(manager.visible_popups().is_empty());
    assert!(manager.drain_events().contains(&PreviewEvent::ForestCleared));
}

#[test]
fn following_a_link_tears_down_and_flags_navigation() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    open(&mut manager, alpha, Instant::now(), "<p>Body.</p>");

    manager
        .link_activated(alpha)
        .expect("activation should record navigation");

    assert!(manager.visible_popups().is_empty());
    assert!(manager.hover_state_is_empty());
    assert_eq!(
        manager.session().get(NAVIGATION_FLAG_KEY).as_deref(),
        Some("true")
    );
}

#[test]
fn arriving_through_a_link_drops_carried_over_popups() {
    let mut store = MemorySessionStore::default();
    NavigationGuard::record_navigation(&mut store).expect("record should work");
    let html = r#"<html><body>
        <p><a class="internal-link" href="alpha">Alpha</a></p>
        <div class="hover-preview" data-level="0"><div class="hover-preview-content">old</div></div>
    </body></html>"#;
    let page = Url::parse(PAGE_URL).expect("page url should parse");
    let mut manager = PreviewManager::init(Document::parse(html), page, PreviewSettings::default())
        .with_session(Box::new(store));

    let arrival = manager.start().expect("start should succeed");

    assert_eq!(arrival, Arrival::FollowedLink);
    let document = manager.document();
    assert!(
        document
            .select(document.body(), |element| element.has_class(POPUP_CLASS))
            .is_empty()
    );
    assert_eq!(manager.session().get(NAVIGATION_FLAG_KEY), None);
}

#[test]
fn show_timer_for_link_in_closed_popup_is_ignored() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    let start = Instant::now();

    let (a, a_at) = open(
        &mut manager,
        alpha,
        start,
        r#"<p>Go to <a class="internal-link" href="beta">Beta</a>.</p>"#,
    );
    let beta = nested_link(&manager, a);
    let (b, b_at) = open(
        &mut manager,
        beta,
        a_at + ms(1_000),
        r#"<p>Then <a class="internal-link" href="gamma">Gamma</a>.</p>"#,
    );
    let gamma = nested_link(&manager, b);

    let entered_at = b_at + ms(1_000);
    manager.link_entered(gamma, entered_at);
    let a_content = manager.popup(a).expect("a exists").content;
    manager.pointer_moved(Some(a_content), entered_at);

    manager.advance(entered_at + ms(300));
    assert!(!manager.document().is_attached(gamma));

    manager.advance(entered_at + ms(500));
    assert!(manager.popup_for_link(gamma).is_none());
    assert_eq!(manager.visible_popups(), vec![a]);
}

#[test]
fn late_content_is_cached_for_the_next_show() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    let start = Instant::now();

    manager.link_entered(alpha, start);
    manager.advance(start + ms(300));
    let (popup, url) = take_fetch(&mut manager);

    manager.link_left(alpha, None, start + ms(600));
    manager.pointer_moved(None, start + ms(600));
    manager.advance(start + ms(900));
    assert!(manager.visible_popups().is_empty());

    manager.content_loaded(popup, &url, loaded(&url, "<p>Late body.</p>"), start + ms(950));
    let cached = manager.popup(popup).expect("popup should exist");
    assert_eq!(cached.content_status, ContentStatus::Loaded);
    assert!(!manager.document().is_attached(cached.element));
    manager.drain_events();

    manager.link_entered(alpha, start + ms(2_000));
    manager.advance(start + ms(2_300));
    let events = manager.drain_events();
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, PreviewEvent::FetchRequested { .. }))
    );
    assert_eq!(manager.visible_popups(), vec![popup]);
    let content = manager.popup(popup).expect("popup should exist").content;
    assert_eq!(manager.document().text_content(content), "Late body.");
}

#[test]
fn stale_content_for_a_different_url_is_discarded() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    let start = Instant::now();

    manager.link_entered(alpha, start);
    manager.advance(start + ms(300));
    let (popup, _) = take_fetch(&mut manager);
    let other = Url::parse("https://site.io/Repo/other").expect("url should parse");

    manager.content_loaded(popup, &other, loaded(&other, "<p>Wrong.</p>"), start + ms(400));

    let popup = manager.popup(popup).expect("popup should exist");
    assert_eq!(popup.content_status, ContentStatus::Loading);
    assert!(manager.drain_events().is_empty());
}

#[test]
fn page_unload_forgets_every_popup() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    open(&mut manager, alpha, Instant::now(), "<p>Body.</p>");

    manager.page_unloaded();

    assert!(manager.popup_for_link(alpha).is_none());
    assert!(manager.visible_popups().is_empty());
    assert_eq!(manager.next_deadline(), None);
}

#[test]
fn show_pending_on_another_link_survives_forest_hide() {
    let mut manager = manager_for(TWO_LINK_HTML);
    let alpha = link_named(&manager, "Alpha");
    let beta = link_named(&manager, "Beta");
    let (a, shown_at) = open(&mut manager, alpha, Instant::now(), "<p>Alpha body.</p>");

    let left_at = shown_at + ms(1_000);
    manager.link_left(alpha, None, left_at);
    manager.pointer_moved(None, left_at);
    let reached_at = left_at + ms(100);
    manager.link_entered(beta, reached_at);
    manager.pointer_moved(Some(beta), reached_at);

    manager.advance(left_at + ms(300));
    assert!(manager.visible_popups().is_empty());
    assert_eq!(manager.popup(a).expect("a exists").state, PopupState::Hidden);
    manager.drain_events();

    manager.advance(reached_at + ms(300));
    let b = manager
        .popup_for_link(beta)
        .expect("beta should preview after the show delay")
        .id;
    assert_eq!(manager.visible_popups(), vec![b]);
    let (_, url) = take_fetch(&mut manager);
    assert_eq!(url.as_str(), "https://site.io/Repo/beta");
}

#[test]
fn reshowing_while_fetch_is_in_flight_does_not_fetch_again() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    let start = Instant::now();

    manager.link_entered(alpha, start);
    manager.advance(start + ms(300));
    let (popup, url) = take_fetch(&mut manager);

    manager.link_left(alpha, None, start + ms(600));
    manager.pointer_moved(None, start + ms(600));
    manager.advance(start + ms(900));
    assert!(manager.visible_popups().is_empty());

    manager.link_entered(alpha, start + ms(2_000));
    manager.advance(start + ms(2_300));
    let events = manager.drain_events();
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, PreviewEvent::FetchRequested { .. }))
    );
    assert_eq!(manager.visible_popups(), vec![popup]);
    let shown = manager.popup(popup).expect("popup should exist");
    assert_eq!(shown.content_status, ContentStatus::Loading);
    assert_eq!(manager.document().attr(shown.loading, "hidden"), None);

    manager.content_loaded(popup, &url, loaded(&url, "<p>Arrived.</p>"), start + ms(2_400));
    let shown = manager.popup(popup).expect("popup should exist");
    assert_eq!(shown.content_status, ContentStatus::Loaded);
    assert_eq!(manager.document().attr(shown.loading, "hidden"), Some(""));
    assert_eq!(manager.document().text_content(shown.content), "Arrived.");
}

#[test]
fn leaving_a_link_into_its_own_chain_schedules_no_hide() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    let start = Instant::now();

    let (a, a_at) = open(
        &mut manager,
        alpha,
        start,
        r#"<p>Go to <a class="internal-link" href="beta">Beta</a>.</p>"#,
    );
    let beta = nested_link(&manager, a);
    let (b, b_at) = open(&mut manager, beta, a_at + ms(1_000), "<p>Leaf.</p>");
    let a_content = manager.popup(a).expect("a exists").content;
    let b_content = manager.popup(b).expect("b exists").content;

    let left_at = b_at + ms(1_000);
    manager.link_left(beta, Some(b_content), left_at);
    manager.link_left(beta, Some(a_content), left_at);
    manager.link_left(alpha, Some(a_content), left_at);
    assert_eq!(manager.pending_timer_count(), 0);

    manager.advance(left_at + ms(5_000));
    assert_eq!(manager.visible_popups(), vec![a, b]);
    assert!(
        !manager
            .drain_events()
            .iter()
            .any(|event| matches!(event, PreviewEvent::PopupHidden { .. }))
    );
}

#[test]
fn replaced_content_forgets_its_trigger_links() {
    let mut manager = manager_for(PAGE_HTML);
    let alpha = link_named(&manager, "Alpha");
    let start = Instant::now();

    let (a, a_at) = open(
        &mut manager,
        alpha,
        start,
        r#"<p>Go to <a class="internal-link" href="beta">Beta</a>.</p>"#,
    );
    let beta = nested_link(&manager, a);
    let (b, b_at) = open(&mut manager, beta, a_at + ms(1_000), "<p>Leaf.</p>");

    let url = manager
        .popup(a)
        .and_then(|popup| popup.url.clone())
        .expect("a should have a url");
    manager.content_loaded(
        a,
        &url,
        loaded(&url, r#"<p>Now <a class="internal-link" href="delta">Delta</a>.</p>"#),
        b_at + ms(100),
    );

    assert!(!manager.is_trigger_link(beta));
    assert!(manager.popup_for_link(beta).is_none());
    assert_eq!(manager.popup(b).expect("b exists").state, PopupState::Hidden);
    assert_eq!(manager.visible_popups(), vec![a]);
    let content = manager.popup(a).expect("a exists").content;
    let links = manager.trigger_links_in(content);
    assert_eq!(links.len(), 1);
    assert_eq!(manager.document().text_content(links[0]), "Delta");
}
