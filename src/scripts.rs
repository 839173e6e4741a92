//! In-page JavaScript used by the engines
//!
//! Every constant is a function expression. [`call`] applies one to
//! JSON-encoded arguments, producing an expression for [`PageDriver::evaluate`].
//!
//! [`PageDriver::evaluate`]: crate::PageDriver::evaluate

use serde_json::Value;

/// Builds `(<function>)(<args>)` with arguments serialized as JSON literals
pub fn call(function: &str, args: &[Value]) -> String {
    let args = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("({function})({args})")
}

pub const MEASURE: &str = r#"() => ({
    scrollX: window.scrollX,
    scrollY: window.scrollY,
    scrollHeight: Math.max(
        document.body ? document.body.scrollHeight : 0,
        document.body ? document.body.offsetHeight : 0,
        document.documentElement.clientHeight,
        document.documentElement.scrollHeight,
        document.documentElement.offsetHeight
    ),
    viewportWidth: window.innerWidth,
    viewportHeight: window.innerHeight,
    devicePixelRatio: window.devicePixelRatio
})"#;

pub const SCROLL_TO: &str = r#"(x, y) => {
    window.scrollTo(x, y);
    window.dispatchEvent(new Event('scroll'));
    return true;
}"#;

pub const SWEEP_STEP: &str = r#"(y) => {
    window.scrollTo(0, y);
    window.dispatchEvent(new Event('scroll'));
    window.dispatchEvent(new Event('resize'));
    return true;
}"#;

pub const SCROLL_BY: &str = r#"(dx) => {
    window.scrollBy(dx, 0);
    return true;
}"#;

pub const ELEMENT_RECT: &str = r#"(selector) => {
    const el = document.querySelector(selector);
    if (!el) return null;
    const r = el.getBoundingClientRect();
    return { left: r.left, top: r.top, width: r.width, height: r.height };
}"#;

pub const ELEMENT_IN_VIEWPORT: &str = r#"(selector) => {
    const el = document.querySelector(selector);
    if (!el) return null;
    const r = el.getBoundingClientRect();
    return r.top >= 0 && r.left >= 0 && r.bottom <= window.innerHeight && r.right <= window.innerWidth;
}"#;

pub const SCROLL_ELEMENT_CENTER: &str = r#"(selector) => {
    const el = document.querySelector(selector);
    if (!el) return false;
    el.scrollIntoView({ behavior: 'auto', block: 'center', inline: 'center' });
    return true;
}"#;

pub const SCROLL_ELEMENT_SMOOTH: &str = r#"(selector) => {
    const el = document.querySelector(selector);
    if (!el) return false;
    el.scrollIntoView({ behavior: 'smooth', block: 'nearest', inline: 'nearest' });
    return true;
}"#;

pub const SYNTHETIC_CLICK: &str = r#"(selector) => {
    const el = document.querySelector(selector);
    if (!el) throw new Error('Element not found during JS click: ' + selector);
    el.click();
    return true;
}"#;

pub const NEUTRALIZE_OVERLAYS: &str = r#"(selectors) => {
    let count = 0;
    for (const selector of selectors) {
        document.querySelectorAll(selector).forEach(el => {
            el.style.pointerEvents = 'none';
            el.style.zIndex = '-1';
            count++;
        });
    }
    return count;
}"#;

pub const APPLY_STYLES: &str = r#"(selector, styles) => {
    const els = document.querySelectorAll(selector);
    els.forEach(el => Object.assign(el.style, styles));
    return els.length;
}"#;

pub const REMOVE_ELEMENTS: &str = r#"(selector) => {
    const els = document.querySelectorAll(selector);
    els.forEach(el => el.remove());
    return els.length;
}"#;

pub const SHOW_ELEMENTS: &str = r#"(selector) => {
    const els = document.querySelectorAll(selector);
    els.forEach(el => {
        el.style.display = 'block';
        el.style.visibility = 'visible';
        el.style.opacity = '1';
    });
    return els.length;
}"#;

pub const SELECT_CONTENT: &str = r#"(selector) => {
    const el = document.querySelector(selector);
    if (!el) return false;
    el.focus();
    if (typeof el.select === 'function') {
        el.select();
    } else {
        const range = document.createRange();
        range.selectNodeContents(el);
        const selection = window.getSelection();
        selection.removeAllRanges();
        selection.addRange(range);
    }
    return true;
}"#;

pub const INJECT_CSS: &str = r#"(css) => {
    const style = document.createElement('style');
    style.setAttribute('data-snapshot-runner', '');
    style.textContent = css;
    (document.head || document.documentElement).appendChild(style);
    return true;
}"#;

pub const COMPUTED_STYLES: &str = r#"(selector) => {
    const el = document.querySelector(selector);
    if (!el) return null;
    const cs = window.getComputedStyle(el);
    const props = ['display', 'visibility', 'opacity', 'position', 'z-index', 'width', 'height',
        'margin', 'padding', 'overflow', 'transform', 'pointer-events'];
    const styles = {};
    props.forEach(p => { styles[p] = cs.getPropertyValue(p); });
    const r = el.getBoundingClientRect();
    return {
        matches: document.querySelectorAll(selector).length,
        rect: { left: r.left, top: r.top, width: r.width, height: r.height },
        styles
    };
}"#;

pub const EAGER_LOADING: &str = r#"() => {
    let changed = 0;
    document.querySelectorAll('img[loading="lazy"], iframe[loading="lazy"]').forEach(el => {
        el.setAttribute('loading', 'eager');
        changed++;
    });
    const attrs = ['data-src', 'data-lazy-src', 'data-original', 'data-lazy'];
    document.querySelectorAll(attrs.map(a => '[' + a + ']').join(',')).forEach(el => {
        for (const attr of attrs) {
            const value = el.getAttribute(attr);
            if (value && el.getAttribute('src') !== value) {
                el.setAttribute('src', value);
                changed++;
                break;
            }
        }
        const srcset = el.getAttribute('data-srcset');
        if (srcset) el.setAttribute('srcset', srcset);
    });
    return changed;
}"#;

pub const IMAGE_STATUS: &str = r#"async (ceilingMs) => {
    const pending = Array.from(document.images).filter(img => !img.complete);
    await Promise.race([
        Promise.all(pending.map(img => img.decode ? img.decode().catch(() => {}) : Promise.resolve())),
        new Promise(resolve => setTimeout(resolve, ceilingMs))
    ]);
    const all = Array.from(document.images);
    const loaded = all.filter(img => img.complete && img.naturalWidth > 0).length;
    const failed = all.filter(img => img.complete && img.naturalWidth === 0).length;
    return { total: all.length, loaded, failed, pending: all.length - loaded - failed };
}"#;

pub const PREFETCH_BACKGROUNDS: &str = r#"async (ceilingMs) => {
    const urls = new Set();
    document.querySelectorAll('*').forEach(el => {
        const bg = window.getComputedStyle(el).backgroundImage;
        if (!bg || bg === 'none') return;
        for (const m of bg.matchAll(/url\(["']?([^"')]+)["']?\)/g)) urls.add(m[1]);
    });
    const loads = Array.from(urls).map(src => new Promise(resolve => {
        const img = new Image();
        img.onload = img.onerror = () => resolve();
        img.src = src;
    }));
    await Promise.race([Promise.all(loads), new Promise(resolve => setTimeout(resolve, ceilingMs))]);
    return urls.size;
}"#;

pub const BLOCK_NAVIGATION: &str = r#"() => {
    if (window.__snapshotNavGuard) return false;
    const loc = window.location;
    const guard = {
        assign: loc.assign,
        replace: loc.replace,
        reload: loc.reload,
        submit: e => { e.preventDefault(); e.stopPropagation(); },
        hashchange: e => { e.preventDefault(); e.stopPropagation(); }
    };
    try {
        loc.assign = url => console.log('Blocked location.assign to:', url);
        loc.replace = url => console.log('Blocked location.replace to:', url);
        loc.reload = () => console.log('Blocked location.reload');
    } catch (e) {}
    document.addEventListener('submit', guard.submit, true);
    window.addEventListener('hashchange', guard.hashchange, true);
    window.__snapshotNavGuard = guard;
    return true;
}"#;

pub const RESTORE_NAVIGATION: &str = r#"() => {
    const guard = window.__snapshotNavGuard;
    if (!guard) return false;
    try {
        window.location.assign = guard.assign;
        window.location.replace = guard.replace;
        window.location.reload = guard.reload;
    } catch (e) {}
    document.removeEventListener('submit', guard.submit, true);
    window.removeEventListener('hashchange', guard.hashchange, true);
    delete window.__snapshotNavGuard;
    return true;
}"#;

pub const CENTER_ELEMENT: &str = r#"(selector, viewportHeight) => {
    const el = document.querySelector(selector);
    if (!el) return false;
    const r = el.getBoundingClientRect();
    const offset = (r.top + r.height / 2) - viewportHeight / 2;
    window.scrollTo(0, window.scrollY + offset);
    return true;
}"#;

pub const DOCUMENT_READY: &str = r#"() => document.readyState !== 'loading'"#;

pub const RESOURCE_COUNT: &str = r#"() => performance.getEntriesByType('resource').length"#;
