//! Embedded single-page control panel.

pub fn dashboard_html() -> &'static str {
    DASHBOARD_HTML
}

const DASHBOARD_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8"/>
  <meta name="viewport" content="width=device-width, initial-scale=1"/>
  <title>Leafcheck</title>
  <style>
    :root { --bg: #0e1012; --card: #171a1d; --line: #2a2e33; --fg: #e6e8ea; --muted: #8f979f; --ok: #3fb950; --bad: #f85149; }
    body { margin: 0; padding: 24px; font: 14px/1.5 system-ui, sans-serif; background: var(--bg); color: var(--fg); }
    h1 { margin: 0 0 4px; font-size: 22px; }
    h3 { margin: 0 0 12px; font-size: 15px; }
    .muted { color: var(--muted); }
    .grid { display: grid; gap: 16px; grid-template-columns: repeat(auto-fit, minmax(360px, 1fr)); margin-top: 16px; }
    .card { background: var(--card); border: 1px solid var(--line); border-radius: 10px; padding: 16px; }
    .row { display: flex; gap: 8px; flex-wrap: wrap; align-items: center; }
    input, button { padding: 7px 10px; border-radius: 6px; border: 1px solid var(--line); background: var(--bg); color: var(--fg); }
    button { cursor: pointer; }
    button:disabled { opacity: .5; cursor: default; }
    table { width: 100%; border-collapse: collapse; }
    th, td { padding: 6px 8px; border-bottom: 1px solid var(--line); text-align: left; vertical-align: top; }
    .ok { color: var(--ok); } .bad { color: var(--bad); }
    pre { margin: 0; max-height: 320px; overflow: auto; font-size: 12px; white-space: pre-wrap; }
  </style>
</head>
<body>
  <h1>🍃 Leafcheck</h1>
  <div class="muted" id="health">…</div>

  <div class="grid">
    <div class="card">
      <h3>Run</h3>
      <div class="row">
        <button id="run-btn" onclick="runNow()">Run check-in now</button>
        <span id="run-status" class="muted"></span>
      </div>
    </div>

    <div class="card">
      <h3>Add account</h3>
      <div class="row">
        <input id="email" placeholder="email" autocomplete="off"/>
        <input id="password" placeholder="password" type="password" autocomplete="new-password"/>
        <button onclick="addAccount()">Add</button>
      </div>
    </div>

    <div class="card">
      <h3>Accounts</h3>
      <table id="accounts"></table>
    </div>

    <div class="card">
      <h3>Recent runs</h3>
      <table id="runs"></table>
    </div>

    <div class="card" style="grid-column: 1 / -1">
      <h3>Log</h3>
      <pre id="logs" class="muted"></pre>
    </div>
  </div>

<script>
const TOKEN_KEY = "leafcheck_admin_token";

async function api(url, options = {}) {
  options.headers = Object.assign({}, options.headers || {});
  const token = localStorage.getItem(TOKEN_KEY);
  if (token) options.headers["x-admin-token"] = token;
  const res = await fetch(url, options);
  if (res.status === 401) {
    const t = prompt("Admin token");
    if (t !== null) { localStorage.setItem(TOKEN_KEY, t); location.reload(); }
    throw new Error("unauthorized");
  }
  return { status: res.status, body: await res.json() };
}

function cell(tr, text, cls) {
  const td = document.createElement("td");
  td.textContent = text;
  if (cls) td.className = cls;
  tr.appendChild(td);
  return td;
}

function header(table, names) {
  table.replaceChildren();
  const tr = document.createElement("tr");
  names.forEach(n => { const th = document.createElement("th"); th.textContent = n; tr.appendChild(th); });
  table.appendChild(tr);
}

async function loadHealth() {
  const res = await fetch("/health");
  const h = await res.json();
  document.getElementById("health").textContent =
    h.scheduler ? `Scheduled ${h.schedule} · next run ${h.next_run || "n/a"}` : "Scheduler disabled";
}

async function loadStatus() {
  const { body } = await api("/api/status");
  document.getElementById("run-btn").disabled = body.running;
  document.getElementById("run-status").textContent = body.running ? "Running…" : "";
  return body.running;
}

async function loadAccounts() {
  const { body } = await api("/api/accounts");
  const table = document.getElementById("accounts");
  header(table, ["ID", "Email", "Added", ""]);
  body.items.forEach(a => {
    const tr = document.createElement("tr");
    cell(tr, a.id); cell(tr, a.email); cell(tr, a.created_at, "muted");
    const btn = document.createElement("button");
    btn.textContent = "Delete";
    btn.onclick = async () => { await api(`/api/accounts/${a.id}`, { method: "DELETE" }); loadAccounts(); };
    cell(tr, "").appendChild(btn);
    table.appendChild(tr);
  });
}

async function loadRuns() {
  const { body } = await api("/api/runs?limit=20");
  const table = document.getElementById("runs");
  header(table, ["Time", "Email", "", "Result", "Balance"]);
  body.items.forEach(r => {
    const tr = document.createElement("tr");
    cell(tr, r.created_at, "muted"); cell(tr, r.email);
    cell(tr, r.success ? "✓" : "✗", r.success ? "ok" : "bad");
    cell(tr, r.result); cell(tr, r.balance);
    table.appendChild(tr);
  });
}

async function loadLogs() {
  const { body } = await api("/api/logs");
  const pre = document.getElementById("logs");
  pre.textContent = (body.lines || []).join("\n");
  pre.scrollTop = pre.scrollHeight;
}

async function addAccount() {
  const email = document.getElementById("email").value.trim();
  const password = document.getElementById("password").value.trim();
  if (!email || !password) return alert("Email and password are required");
  const { status, body } = await api("/api/accounts", {
    method: "POST",
    headers: { "Content-Type": "application/json" },
    body: JSON.stringify({ email, password }),
  });
  if (status !== 200) return alert(body.error);
  document.getElementById("email").value = "";
  document.getElementById("password").value = "";
  loadAccounts();
}

async function runNow() {
  const { status, body } = await api("/api/run/async", { method: "POST" });
  if (status !== 202) return alert(body.error);
  poll();
}

async function poll() {
  const running = await loadStatus();
  loadLogs();
  if (running) { setTimeout(poll, 3000); } else { loadRuns(); loadHealth(); }
}

loadHealth(); loadAccounts(); loadRuns(); poll();
</script>
</body>
</html>
"#;
