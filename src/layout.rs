//! Popup placement relative to the element that triggered it.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// Viewport-relative rectangle, as reported by the host for an anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementConfig {
    /// Minimum distance kept between a popup and any viewport edge.
    pub margin: f64,
    /// Space between the anchor and the popup.
    pub gap: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Page coordinates (scroll offset included).
    pub x: f64,
    pub y: f64,
    pub opened_upward: bool,
    /// Set when neither side fits and the popup is pinned to the top margin.
    pub max_height: Option<f64>,
}

pub fn place(popup: Size, anchor: Rect, viewport: &Viewport, config: &PlacementConfig) -> Placement {
    let x = clamp_horizontal(anchor.center_x() - popup.width / 2.0, popup.width, viewport, config);

    let below = anchor.bottom() + config.gap;
    let bottom_limit = viewport.height - config.margin;
    let (y, opened_upward, max_height) = if below + popup.height <= bottom_limit {
        (below, false, None)
    } else {
        let above = anchor.y - config.gap - popup.height;
        if above >= config.margin {
            (above, true, None)
        } else {
            let available = (viewport.height - 2.0 * config.margin).max(0.0);
            (config.margin, false, Some(available))
        }
    };

    Placement {
        x: x + viewport.scroll_x,
        y: y + viewport.scroll_y,
        opened_upward,
        max_height,
    }
}

fn clamp_horizontal(x: f64, width: f64, viewport: &Viewport, config: &PlacementConfig) -> f64 {
    let max_x = viewport.width - config.margin - width;
    if max_x < config.margin {
        return config.margin;
    }
    x.clamp(config.margin, max_x)
}

#[cfg(test)]
mod tests {
    use super::{PlacementConfig, Rect, Size, Viewport, place};

    const CONFIG: PlacementConfig = PlacementConfig {
        margin: 10.0,
        gap: 10.0,
    };

    fn viewport() -> Viewport {
        Viewport {
            width: 1000.0,
            height: 800.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }

    fn popup() -> Size {
        Size {
            width: 500.0,
            height: 300.0,
        }
    }

    #[test]
    fn centers_below_anchor_when_space_allows() {
        let anchor = Rect {
            x: 400.0,
            y: 100.0,
            width: 200.0,
            height: 20.0,
        };
        let placement = place(popup(), anchor, &viewport(), &CONFIG);

        assert_eq!(placement.x, 250.0);
        assert_eq!(placement.y, 130.0);
        assert!(!placement.opened_upward);
        assert_eq!(placement.max_height, None);
    }

    #[test]
    fn clamps_against_right_edge() {
        let anchor = Rect {
            x: 950.0,
            y: 100.0,
            width: 40.0,
            height: 20.0,
        };
        let placement = place(popup(), anchor, &viewport(), &CONFIG);

        assert!(placement.x >= 0.0);
        assert!(placement.x + popup().width <= 1000.0 - CONFIG.margin);
        assert_eq!(placement.x, 490.0);
    }

    #[test]
    fn clamps_against_left_edge() {
        let anchor = Rect {
            x: 0.0,
            y: 100.0,
            width: 30.0,
            height: 20.0,
        };
        let placement = place(popup(), anchor, &viewport(), &CONFIG);
        assert_eq!(placement.x, CONFIG.margin);
    }

    #[test]
    fn opens_upward_near_viewport_bottom() {
        let anchor = Rect {
            x: 400.0,
            y: 700.0,
            width: 100.0,
            height: 20.0,
        };
        let placement = place(popup(), anchor, &viewport(), &CONFIG);

        assert!(placement.opened_upward);
        assert_eq!(placement.y, 390.0);
    }

    #[test]
    fn pins_to_top_margin_when_neither_side_fits() {
        let anchor = Rect {
            x: 400.0,
            y: 200.0,
            width: 100.0,
            height: 20.0,
        };
        let tall = Size {
            width: 500.0,
            height: 700.0,
        };
        let placement = place(tall, anchor, &viewport(), &CONFIG);

        assert_eq!(placement.y, CONFIG.margin);
        assert!(!placement.opened_upward);
        assert_eq!(placement.max_height, Some(780.0));
    }

    #[test]
    fn adds_scroll_offset_to_page_coordinates() {
        let anchor = Rect {
            x: 400.0,
            y: 100.0,
            width: 200.0,
            height: 20.0,
        };
        let scrolled = Viewport {
            scroll_y: 1500.0,
            ..viewport()
        };
        let placement = place(popup(), anchor, &scrolled, &CONFIG);
        assert_eq!(placement.y, 1630.0);
    }

    #[test]
    fn popup_wider_than_viewport_sticks_to_left_margin() {
        let anchor = Rect {
            x: 100.0,
            y: 100.0,
            width: 20.0,
            height: 20.0,
        };
        let wide = Size {
            width: 1200.0,
            height: 100.0,
        };
        let placement = place(wide, anchor, &viewport(), &CONFIG);
        assert_eq!(placement.x, CONFIG.margin);
    }
}
