//! Browser side of the notification channel, served at
//! `/__packline/client.js`.

pub const CLIENT_PATH: &str = "/__packline/client.js";
pub const EVENTS_PATH: &str = "/__packline/events";
pub const MODULE_PATH: &str = "/__packline/module/";

/// Live-reload client. Connects back to the origin it was loaded from.
pub const CLIENT_JS: &str = r#"(function () {
  var script = document.currentScript;
  var origin = script ? new URL(script.src).origin : location.origin;
  var current = null;
  var tag = "[packline]";

  function fetchModule(id) {
    return fetch(origin + "/__packline/module/" + id).then(function (res) {
      if (!res.ok) throw new Error("cannot fetch " + id + ": " + res.status);
      return res.text();
    });
  }

  function replace(msg) {
    var ids = msg.modules.concat(msg.boundaries.filter(function (b) {
      return msg.modules.indexOf(b) < 0;
    }));
    Promise.all(ids.map(fetchModule)).then(function (sources) {
      sources.forEach(function (code) { (0, eval)(code); });
      window.__packline.hot.apply(msg.modules, msg.boundaries);
      current = msg.build;
      console.log(tag, "updated", msg.modules.join(", "));
    }).catch(function (err) {
      console.warn(tag, "hot update failed, reloading", err);
      location.reload();
    });
  }

  function handle(msg) {
    switch (msg.type) {
      case "connected":
        if (current !== null && msg.build !== null && msg.build !== current) location.reload();
        current = msg.build;
        console.log(tag, "connected");
        break;
      case "module-replace":
        replace(msg);
        break;
      case "full-reload":
        console.log(tag, "reloading:", msg.reason);
        location.reload();
        break;
      case "error":
        console.error(tag, msg.code + ": " + msg.message);
        break;
    }
  }

  function connect() {
    var ws = new WebSocket(origin.replace(/^http/, "ws") + "/__packline/events");
    ws.onmessage = function (event) { handle(JSON.parse(event.data)); };
    ws.onclose = function () { setTimeout(connect, 1000); };
  }

  connect();
})();
"#;
