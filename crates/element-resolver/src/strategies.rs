//! Scoring, category heuristics and page-side scripts.
//!
//! The scan's scoring runs in Rust over descriptors harvested from the
//! page, so the weights stay unit-testable; only the harvest and reveal
//! scripts execute inside the document.

use crate::types::{ElementDescriptor, ScoreWeights, INTERACTIVE_TAGS, SCORED_ATTRIBUTES};

/// Harvests an [`ElementDescriptor`] for every element in the document.
pub(crate) const HARVEST_JS: &str = r#"
(() => {
  const uniqueSelector = (el) => {
    const path = [];
    let node = el;
    while (node && node.nodeType === Node.ELEMENT_NODE) {
      let sel = node.nodeName.toLowerCase();
      if (node.id) {
        path.unshift(sel + '#' + CSS.escape(node.id));
        break;
      }
      let sib = node, nth = 1;
      while (sib.previousElementSibling) {
        sib = sib.previousElementSibling;
        if (sib.nodeName.toLowerCase() === sel) nth++;
      }
      if (nth > 1) sel += ':nth-of-type(' + nth + ')';
      path.unshift(sel);
      node = node.parentElement;
    }
    return path.join(' > ');
  };
  const attrNames = ['id', 'name', 'placeholder', 'aria-label', 'title', 'alt'];
  const out = [];
  for (const el of document.querySelectorAll('*')) {
    const style = getComputedStyle(el);
    const rect = el.getBoundingClientRect();
    const visible = rect.width > 0 && rect.height > 0 &&
      style.display !== 'none' && style.visibility !== 'hidden' && style.opacity !== '0';
    const attributes = {};
    for (const name of attrNames) {
      const value = el.getAttribute(name);
      if (value) attributes[name] = value;
    }
    out.push({
      tag: el.tagName.toLowerCase(),
      role: el.getAttribute('role') || '',
      text: (el.textContent || '').trim().slice(0, 300),
      attributes,
      isVisible: visible,
      boundingRect: { x: rect.left, y: rect.top, width: rect.width, height: rect.height },
      generatedSelector: uniqueSelector(el),
    });
  }
  return out;
})()
"#;

/// Un-hides the resolved element and scrolls it into view.
///
/// Walks ancestors clearing display/visibility/opacity overrides and the
/// disabled/aria-hidden/hidden attributes. Deliberate policy: the system
/// favors task completion over preserving the page's visual state, and
/// this runs only against the element the plan is about to interact with.
pub(crate) fn reveal_script(selector_literal: &str) -> String {
    format!(
        r#"(() => {{
  let el;
  try {{ el = document.querySelector({selector_literal}); }} catch (err) {{ return false; }}
  if (!el) return false;
  let current = el;
  while (current) {{
    const style = getComputedStyle(current);
    if (style.display === 'none') current.style.setProperty('display', 'block', 'important');
    if (style.visibility === 'hidden') current.style.setProperty('visibility', 'visible', 'important');
    if (style.opacity === '0') current.style.setProperty('opacity', '1', 'important');
    if (current.disabled) current.disabled = false;
    if (current.hasAttribute('aria-hidden')) current.removeAttribute('aria-hidden');
    if (current.hasAttribute('hidden')) current.removeAttribute('hidden');
    current = current.parentElement;
  }}
  el.setAttribute('data-pilot-target', '1');
  el.scrollIntoView({{ behavior: 'smooth', block: 'center' }});
  return true;
}})()"#
    )
}

/// Category-specific selector templates tried before the full scan.
///
/// Site-fragile by nature; a miss here just falls through to the scored
/// scan, so stale templates degrade rather than break resolution.
pub fn category_selectors(description: &str) -> Vec<String> {
    let desc = description.to_lowercase();
    let escaped = escape_attribute_value(description);

    if desc.contains("search") {
        vec![
            "input[name=\"search_query\"]".into(),
            "input[type=\"search\"]".into(),
            "input[aria-label*=\"search\" i]".into(),
            "#search".into(),
            ".search-input".into(),
        ]
    } else if desc.contains("button") {
        vec![
            format!("button[aria-label*=\"{escaped}\" i]"),
            format!("button[title*=\"{escaped}\" i]"),
            "button[type=\"submit\"]".into(),
        ]
    } else if desc.contains("input") {
        vec![
            format!("input[placeholder*=\"{escaped}\" i]"),
            format!("input[aria-label*=\"{escaped}\" i]"),
            "input[type=\"text\"]".into(),
        ]
    } else if desc.contains("link") {
        vec![
            format!("a[aria-label*=\"{escaped}\" i]"),
            format!("a[title*=\"{escaped}\" i]"),
        ]
    } else {
        Vec::new()
    }
}

/// Selector for the fallback attribute wait: any element whose label-ish
/// attribute contains the description.
pub(crate) fn attribute_wait_selector(description: &str) -> String {
    let escaped = escape_attribute_value(description);
    format!(
        "[aria-label*=\"{escaped}\" i], [title*=\"{escaped}\" i], [placeholder*=\"{escaped}\" i]"
    )
}

/// Escape a value for embedding inside a double-quoted CSS attribute
/// selector.
pub(crate) fn escape_attribute_value(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Score one harvested descriptor against the description.
pub fn score_descriptor(
    descriptor: &ElementDescriptor,
    description: &str,
    weights: &ScoreWeights,
) -> f64 {
    let desc = description.to_lowercase();
    let mut score = 0.0;

    let text = descriptor.text.to_lowercase();
    if !text.is_empty() && text.contains(&desc) {
        score += if text == desc {
            weights.exact_text
        } else {
            weights.partial_text
        };
    }

    for attr in SCORED_ATTRIBUTES {
        if let Some(value) = descriptor.attributes.get(*attr) {
            let value = value.to_lowercase();
            if !value.is_empty() && value.contains(&desc) {
                score += if value == desc {
                    weights.exact_attribute
                } else {
                    weights.partial_attribute
                };
            }
        }
    }

    if INTERACTIVE_TAGS.contains(&descriptor.tag.as_str()) {
        if desc.contains(&descriptor.tag) {
            score += weights.tag_mention;
        }
        score += weights.interactive_bonus;
    }

    if descriptor.is_visible {
        score += weights.visibility_bonus;
    }

    score
}

/// Pick the best-scoring descriptor, honoring the acceptance threshold.
pub(crate) fn best_candidate<'a>(
    descriptors: &'a [ElementDescriptor],
    description: &str,
    weights: &ScoreWeights,
) -> Option<(&'a ElementDescriptor, f64)> {
    let mut best: Option<(&ElementDescriptor, f64)> = None;
    for descriptor in descriptors {
        if descriptor.generated_selector.is_empty() {
            continue;
        }
        let score = score_descriptor(descriptor, description, weights);
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((descriptor, score));
        }
    }

    best.filter(|(_, score)| *score > weights.acceptance_threshold)
}
