//! Browser-side module registry.
//!
//! Every entry and named bundle starts with [`PRELUDE`]. It installs a single
//! `__packline` object on the global scope; later bundles find it and reuse
//! it. Modules are registered with `__packline.define(id, factory)` and
//! evaluated lazily on first `require`.

use crate::js;
use std::collections::BTreeMap;

/// Registry runtime shared by all bundles of a build.
pub const PRELUDE: &str = r#"(function (g) {
  if (g.__packline) return;
  var defs = {}, cache = {}, accepted = {}, styles = {}, loading = {}, map = {};
  var has = Object.prototype.hasOwnProperty;
  var rt = g.__packline = { p: "" };
  rt.define = function (id, factory) { defs[id] = factory; };
  rt.require = function (id) {
    if (has.call(cache, id)) return cache[id].exports;
    if (!has.call(defs, id)) throw new Error("packline: module not found: " + id);
    var module = { id: id, exports: {}, hot: {
      accept: function (cb) { accepted[id] = cb || true; },
      data: {}
    } };
    cache[id] = module;
    defs[id].call(module.exports, module, module.exports, rt.require);
    return module.exports;
  };
  rt.interop = function (m) {
    if (m && m.__esModule) return m;
    var ns = { "default": m };
    if (m && typeof m === "object") {
      for (var k in m) if (k !== "default" && has.call(m, k)) ns[k] = m[k];
    }
    return ns;
  };
  rt["export"] = function (exports, getters) {
    for (var k in getters) {
      if (has.call(getters, k)) Object.defineProperty(exports, k, { enumerable: true, get: getters[k] });
    }
  };
  rt.reexport = function (exports, m, names) {
    var bind = function (name, from) {
      Object.defineProperty(exports, name, { enumerable: true, get: function () {
        return from === "*" ? m : m[from];
      } });
    };
    if (names) {
      for (var n in names) if (has.call(names, n)) bind(n, names[n]);
      return;
    }
    for (var k in m) {
      if (k !== "default" && k !== "__esModule" && has.call(m, k) && !has.call(exports, k)) bind(k, k);
    }
  };
  rt.external = function (name) {
    var v = g[name];
    if (v === undefined) throw new Error("packline: external global '" + name + "' is not defined");
    return v;
  };
  rt.style = function (id, css) {
    var el = styles[id];
    if (!el) {
      el = styles[id] = document.createElement("style");
      el.setAttribute("data-packline", id);
      document.head.appendChild(el);
    }
    el.textContent = css;
  };
  rt.chunks = function (m) { for (var id in m) if (has.call(m, id)) map[id] = m[id]; };
  rt.load = function (id) {
    if (has.call(defs, id) || !has.call(map, id)) {
      return new Promise(function (resolve) { resolve(rt.interop(rt.require(id))); });
    }
    var file = map[id];
    if (!loading[file]) {
      loading[file] = new Promise(function (resolve, reject) {
        var s = document.createElement("script");
        s.src = rt.p + file;
        s.onload = resolve;
        s.onerror = function () {
          delete loading[file];
          reject(new Error("packline: failed to load chunk " + file));
        };
        document.head.appendChild(s);
      });
    }
    return loading[file].then(function () { return rt.interop(rt.require(id)); });
  };
  rt.hot = {
    apply: function (modules, boundaries) {
      var i;
      for (i = 0; i < modules.length; i++) delete cache[modules[i]];
      for (i = 0; i < boundaries.length; i++) {
        var b = boundaries[i];
        delete cache[b];
        rt.require(b);
        if (typeof accepted[b] === "function") accepted[b]();
      }
    }
  };
})(typeof self !== "undefined" ? self : this);
"#;

/// Wrap compiled module code in a registry definition.
///
/// The code starts on its own line, so line `n` of the module maps to line
/// `n + 1` of the wrapper.
#[must_use]
pub fn define(id: &str, code: &str) -> String {
    let mut out = String::with_capacity(code.len() + id.len() + 64);
    out.push_str("__packline.define(");
    out.push_str(&js::quote(id));
    out.push_str(", function (module, exports, require) {\n");
    out.push_str(code);
    if !code.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("});\n");
    out
}

/// Bundle header: the runtime, the public path and (for entry bundles) the
/// async chunk map.
#[must_use]
pub fn header(public_path: &str, chunk_map: Option<&BTreeMap<String, String>>) -> String {
    let mut out = String::from(PRELUDE);
    out.push_str("__packline.p = ");
    out.push_str(&js::quote(public_path));
    out.push_str(";\n");
    if let Some(map) = chunk_map.filter(|m| !m.is_empty()) {
        let json = serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string());
        out.push_str("__packline.chunks(");
        out.push_str(&json);
        out.push_str(");\n");
    }
    out
}

/// Statement that evaluates an entry module.
#[must_use]
pub fn start(id: &str) -> String {
    format!("__packline.require({});\n", js::quote(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_puts_code_on_its_own_line() {
        let wrapped = define("src/a.js", "var a = 1;");
        let lines: Vec<&str> = wrapped.lines().collect();
        assert_eq!(
            lines[0],
            "__packline.define(\"src/a.js\", function (module, exports, require) {"
        );
        assert_eq!(lines[1], "var a = 1;");
        assert_eq!(lines[2], "});");
    }

    #[test]
    fn test_header_includes_chunk_map() {
        let mut map = BTreeMap::new();
        map.insert("src/Page.js".to_string(), "static/js/Page.chunk.js".to_string());
        let header = header("./", Some(&map));
        assert!(header.starts_with("(function (g) {"));
        assert!(header.contains("__packline.p = \"./\";"));
        assert!(header.contains("__packline.chunks({\"src/Page.js\":\"static/js/Page.chunk.js\"});"));
    }

    #[test]
    fn test_header_without_chunks() {
        assert!(!header("./", None).contains("__packline.chunks("));
    }
}
