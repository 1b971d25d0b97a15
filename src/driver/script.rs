// =============================================================================
// In-page Driver script — injected once per Session on ENTERING `Ready`
// =============================================================================
//
// Defines `window.__fleetDriver`, the bridge the Rust side calls into via
// CDP `Runtime.evaluate`. The script is deliberately defensive: every
// operation validates its DOM assumptions before acting and reports a typed
// error string rather than throwing, so failures surface through the normal
// Driver error taxonomy (spec.md §4.2) instead of as CDP evaluation
// exceptions.
//
// `submitOrder` walks the mandated state machine one explicit predicate +
// actuation per state: PRE_VALIDATE -> SELECT_TYPE -> OPEN_DROPDOWN ->
// PICK_OPTION -> WRITE_PRICE? -> VERIFY_PRICE? -> SUBMIT -> POST_VALIDATE.
// Every selector the order ticket touches is scoped to `driver.ticketEl` so
// it can never reach into the market-analyzer panel elsewhere on the page —
// the two surfaces share no selector root.
// =============================================================================

/// Injected via `Page.addScriptToEvaluateOnNewDocument` at `LOADING` and
/// re-verified present at every `READY` health check (a missing bridge
/// after injection is itself a `DriverMissing` failure, spec.md §4.4).
pub const DRIVER_SCRIPT: &str = r#"
(function () {
  if (window.__fleetDriver) return;

  function findOne(selectors, scope) {
    const root = scope || document;
    for (const sel of selectors) {
      const el = root.querySelector(sel);
      if (el) return el;
    }
    return null;
  }

  function writeAndVerify(el, value, attempts) {
    for (let i = 0; i < attempts; i++) {
      el.focus();
      el.value = value;
      el.dispatchEvent(new Event('input', { bubbles: true }));
      el.dispatchEvent(new Event('change', { bubbles: true }));
      if (el.value === String(value)) return true;
    }
    return false;
  }

  // UI-locale-dependent by nature (spec.md §9 open question) — this is the
  // pluggable part; the kinds themselves are fixed by the error taxonomy.
  const ERROR_PATTERNS = [
    [/insufficient funds/i, 'INSUFFICIENT_FUNDS'],
    [/market (is )?closed/i, 'MARKET_CLOSED'],
    [/reject/i, 'ORDER_REJECTION'],
    [/timed? ?out/i, 'CONNECTION_TIMEOUT'],
  ];

  function classifyBannerText(text) {
    for (const [pattern, kind] of ERROR_PATTERNS) {
      if (pattern.test(text)) return kind;
    }
    return 'UNKNOWN';
  }

  // Error simulator hooks: a test harness or operator sets these directly
  // via `window.__fleetFailureInjection` (or `driver.setFailureInjection`)
  // to exercise the silent-failure and insufficient-funds paths without a
  // misbehaving site.
  const injection = (window.__fleetFailureInjection = window.__fleetFailureInjection || {
    preValidateError: null,
    suppressAck: false,
  });

  const driver = {
    ready: false,
    ticketEl: null,

    init() {
      this.ticketEl = findOne(['[data-testid="order-ticket"]', '.order-ticket', 'form']);
      const accountSelector = findOne(['[data-testid="account-selector"]', '.account-selector']);
      this.ready = !!(this.ticketEl && accountSelector);
      return this.ready;
    },

    setFailureInjection(opts) {
      Object.assign(injection, opts || {});
      return { ok: true };
    },

    // PRE_VALIDATE: the ticket must exist and must not already be showing a
    // blocking banner (e.g. insufficient funds surfaced from account state
    // before a single field is touched).
    preValidate() {
      if (!this.ticketEl) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'order ticket' };
      if (injection.preValidateError) {
        return { ok: false, kind: injection.preValidateError, detail: 'pre-validate banner' };
      }
      const banner = findOne(['[data-testid="error-banner"]', '.error-banner'], this.ticketEl);
      if (banner && banner.textContent.trim()) {
        return { ok: false, kind: classifyBannerText(banner.textContent), detail: banner.textContent.trim() };
      }
      return { ok: true };
    },

    // SELECT_TYPE / OPEN_DROPDOWN / PICK_OPTION collapsed into one actuation
    // pair since the dropdown has no separate verification surface.
    selectOrderType(kind) {
      const trigger = findOne(['[data-testid="order-type-select"]'], this.ticketEl);
      if (!trigger) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'order type select' };
      trigger.click(); // OPEN_DROPDOWN
      const option = findOne([`[data-testid="order-type-option-${kind.toLowerCase()}"]`], this.ticketEl);
      if (!option) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: `order type option ${kind}` };
      option.click(); // PICK_OPTION
      return { ok: true };
    },

    submitOrder(params) {
      const start = performance.now();
      const attempts = params.writeAttempts || 3;
      try {
        const pre = this.preValidate();
        if (!pre.ok) return pre;

        const symbolInput = findOne(['[data-testid="symbol-input"]', 'input[name="symbol"]'], this.ticketEl);
        if (!symbolInput) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'symbol input' };
        if (!writeAndVerify(symbolInput, params.symbol, attempts)) {
          return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'symbol write-verify failed' };
        }

        const typeResult = this.selectOrderType(params.orderKind);
        if (!typeResult.ok) return typeResult;

        const sideButton = findOne([`[data-testid="${params.action.toLowerCase()}-button"]`], this.ticketEl);
        if (!sideButton) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'side button' };

        const qtyInput = findOne(['[data-testid="quantity-input"]', 'input[name="quantity"]'], this.ticketEl);
        if (qtyInput && !writeAndVerify(qtyInput, params.quantity, attempts)) {
          return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'quantity write-verify failed' };
        }

        // WRITE_PRICE / VERIFY_PRICE, skipped entirely for MARKET.
        if (params.orderKind !== 'MARKET') {
          const price = params.limitPrice != null ? params.limitPrice : params.stopPrice;
          if (price != null) {
            const priceSelector =
              params.orderKind === 'STOP' ? '[data-testid="stop-price-input"]' : '[data-testid="limit-price-input"]';
            const priceInput = findOne([priceSelector], this.ticketEl);
            if (!priceInput) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'price input' };
            if (!writeAndVerify(priceInput, price, attempts)) {
              return { ok: false, kind: 'VALIDATION_TIMEOUT', detail: 'price write-verify failed' };
            }
            // Deep re-verify is the heaviest non-critical check: skipped
            // under governor DEGRADED/CRITICAL pacing.
            if (!params.skipDeepVerify && Number(priceInput.value) !== Number(price)) {
              return { ok: false, kind: 'VALIDATION_TIMEOUT', detail: 'price verify mismatch' };
            }
          }
        }

        // SUBMIT tolerates a transient disabled state from the type/price
        // actuations above settling; clicking a disabled control is a no-op
        // rather than an error, so POST_VALIDATE is what actually catches it.
        sideButton.click();
        const submitButton = findOne(['[data-testid="submit-order-button"]'], this.ticketEl);
        if (!submitButton) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'submit button' };
        submitButton.click();

        return this.postValidate(start);
      } catch (e) {
        return { ok: false, kind: 'UNKNOWN', detail: String(e) };
      }
    },

    // POST_VALIDATE: the no-silent-failures gate. A click alone is never
    // reported as success — either an error banner or an acknowledgement
    // signal must be observed, else the caller gets `acknowledged: false`
    // and treats the order as orphaned rather than filled.
    postValidate(start) {
      if (injection.suppressAck) {
        return { ok: true, acknowledged: false, elapsedMs: performance.now() - start };
      }
      const banner = findOne(['[data-testid="error-banner"]', '.error-banner'], this.ticketEl);
      if (banner && banner.textContent.trim()) {
        return { ok: false, kind: classifyBannerText(banner.textContent), detail: banner.textContent.trim() };
      }
      const ack = findOne(['[data-testid="order-ack-toast"]', '[data-testid="order-confirmation"]', '.order-ack']);
      return { ok: true, acknowledged: !!ack, elapsedMs: performance.now() - start };
    },

    // Dispatch composes brackets itself as three linked `submitOrder` calls
    // (entry, TP child, SL child) sharing a parent fingerprint — this is a
    // thin alias kept for ticket UIs that also expose a native one-shot
    // bracket attach, never the bracket linkage path itself.
    submitBracket(params) {
      return this.submitOrder(params);
    },

    exitPosition(symbol) {
      const closeButton = findOne(
        [`[data-testid="close-position-${symbol}"]`, '[data-testid="flatten-all-button"]'],
        this.ticketEl
      );
      if (!closeButton) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'close button' };
      closeButton.click();
      return { ok: true };
    },

    changeSymbol(symbol) {
      const symbolInput = findOne(['[data-testid="symbol-input"]', 'input[name="symbol"]'], this.ticketEl);
      if (!symbolInput) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'symbol input' };
      const wrote = writeAndVerify(symbolInput, symbol, 3);
      return wrote ? { ok: true } : { ok: false, kind: 'VALIDATION_TIMEOUT', detail: 'symbol write-verify failed' };
    },

    // Reads the market-analyzer's own last-price display — a distinct panel
    // from the order ticket, used as the reference price for bracket TP/SL
    // offsets and scale-in ladder spacing. Never writes to this panel.
    readMarketPrice() {
      const priceEl = findOne([
        '[data-testid="market-analyzer"] [data-testid="last-price"]',
        '[data-testid="analyzer-last-price"]',
      ]);
      if (!priceEl) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'analyzer last price' };
      const price = parseFloat(priceEl.textContent || priceEl.getAttribute('data-price') || 'NaN');
      if (Number.isNaN(price)) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'analyzer last price unparsable' };
      return { ok: true, price };
    },

    switchAccount(account) {
      const selector = findOne(['[data-testid="account-selector"]']);
      if (!selector) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'account selector' };
      selector.value = account;
      selector.dispatchEvent(new Event('change', { bubbles: true }));
      return { ok: true };
    },

    // Authentication-state classification consulted by the Supervisor before
    // it attempts credential replay (spec.md §4.3 step 5).
    classifyAuthState() {
      if (findOne(['[data-testid="login-form"]', 'form[data-testid="login"]'])) return 'login_form';
      if (findOne(['[data-testid="account-chooser"]'])) return 'account_chooser';
      if (findOne(['[data-testid="order-ticket"]', '.order-ticket'])) return 'authenticated';
      return 'unknown';
    },

    typeCredentials(identity, secret) {
      const identityInput = findOne(['[data-testid="login-identity"]', 'input[name="username"]', 'input[type="email"]']);
      const secretInput = findOne(['[data-testid="login-secret"]', 'input[name="password"]', 'input[type="password"]']);
      if (!identityInput || !secretInput) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'login fields' };
      if (!writeAndVerify(identityInput, identity, 3) || !writeAndVerify(secretInput, secret, 3)) {
        return { ok: false, kind: 'VALIDATION_TIMEOUT', detail: 'credential write-verify failed' };
      }
      const submit = findOne(['[data-testid="login-submit"]', 'button[type="submit"]']);
      if (!submit) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'login submit' };
      submit.click();
      return { ok: true };
    },

    pickAccount(identity) {
      const option = findOne([`[data-testid="account-option-${identity}"]`]);
      if (!option) return { ok: false, kind: 'DOM_ELEMENT_MISSING', detail: 'account option' };
      option.click();
      return { ok: true };
    },

    // Restores a recovered TradingContext into the live ticket on entering
    // READY (spec.md §4.3 step 6). Best-effort: a missing symbol input here
    // is reported, not thrown, since the ticket may simply not expose one
    // of these fields for every instrument.
    restoreTradingContext(ctx) {
      if (!ctx || !ctx.symbol) return { ok: true };
      const symbolInput = findOne(['[data-testid="symbol-input"]', 'input[name="symbol"]'], this.ticketEl);
      if (symbolInput) writeAndVerify(symbolInput, ctx.symbol, 3);
      const qtyInput = findOne(['[data-testid="quantity-input"]', 'input[name="quantity"]'], this.ticketEl);
      if (qtyInput && ctx.quantity) writeAndVerify(qtyInput, ctx.quantity, 3);
      return { ok: true };
    },

    scrapeAccounts() {
      const rows = document.querySelectorAll('[data-testid="account-row"]');
      const out = [];
      rows.forEach((row) => {
        out.push({
          account: row.getAttribute('data-account') || '',
          balance: parseFloat(row.getAttribute('data-balance') || '0'),
          openPnl: parseFloat(row.getAttribute('data-open-pnl') || '0'),
          netLiq: parseFloat(row.getAttribute('data-net-liq') || '0'),
        });
      });
      return out;
    },
  };

  window.__fleetDriver = driver;
  driver.init();
})();
"#;
