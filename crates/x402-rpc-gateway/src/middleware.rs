//! The x402 payment gate: classifies each request into the token, payment or
//! no-credentials path and orchestrates verify, settle and token issuance.

use std::future::Future;

use actix_web::http::header::{self, HeaderValue};
use actix_web::http::Method;
use actix_web::{web, HttpRequest, HttpResponse};
use alloy::primitives::Address;
use base64::Engine;

use x402_batch::{
    Facilitator, PaymentRequiredBody, PaymentRequirements, PaymentResource, RequirementsExtra,
    TokenManager, X402Error, EXACT_SCHEME, X402_VERSION,
};

use crate::replay::SeenPayments;

/// Response header carrying the base64-encoded 402 payload.
const PAYMENT_REQUIRED_HEADER: &str = "Payment-Required";

/// Request header the client sends its payment in.
const PAYMENT_SIGNATURE_HEADER: &str = "Payment-Signature";

/// Response header carrying the issued batch JWT.
const PAYMENT_TOKEN_HEADER: &str = "X-Payment-Token";

/// Tells the client how many credits remain after this call.
const CREDITS_REMAINING_HEADER: &str = "x-rpc-credits-remaining";

/// The sink the gate hands authorized requests to. The request body has been
/// fully read by the gate; the adapter receives the restored bytes.
pub trait Upstream: Send + Sync {
    fn forward(&self, req: &HttpRequest, body: web::Bytes) -> impl Future<Output = HttpResponse>;
}

/// Static inputs of the payment gate.
pub struct GateConfig {
    /// CAIP-2 chain identifier, e.g. "eip155:84532".
    pub network: String,
    /// The gateway's stablecoin receiving address.
    pub pay_to: Address,
    /// The stablecoin contract on the target network.
    pub asset: Address,
    /// EIP-712 domain name of the asset contract.
    pub asset_domain_name: String,
    /// EIP-712 domain version of the asset contract.
    pub asset_domain_version: String,
    /// Public URL of this gateway, used in the x402 resource field.
    pub gateway_url: String,
    /// Payment amount (atomic units) for one batch of credits.
    pub max_amount_required: i64,
    /// Credits issued per batch purchase.
    pub credits_per_payment: i64,
}

struct Payments<F> {
    facilitator: F,
    tokens: TokenManager,
}

/// The x402 batch-token payment gate.
///
/// Generic over the facilitator and the upstream sink so tests can substitute
/// stubs. When constructed without payments it degrades to a transparent
/// pass-through proxy.
pub struct PaymentGate<F, U> {
    payments: Option<Payments<F>>,
    upstream: U,
    credits_per_payment: i64,
    /// Requirements JSON handed to the facilitator on verify/settle.
    requirements_json: Vec<u8>,
    /// Pre-serialized 402 body.
    body_402: Vec<u8>,
    /// base64(body_402), sent in the Payment-Required header.
    header_402: String,
    /// Template for 402 bodies that carry a reason code.
    template_402: PaymentRequiredBody,
    seen: SeenPayments,
}

impl<F: Facilitator, U: Upstream> PaymentGate<F, U> {
    /// Build the gate, pre-serializing the advertisement material once.
    pub fn new(
        cfg: &GateConfig,
        payments: Option<(F, TokenManager)>,
        upstream: U,
    ) -> Result<Self, serde_json::Error> {
        let requirements = PaymentRequirements {
            scheme: EXACT_SCHEME.to_string(),
            network: cfg.network.clone(),
            amount: cfg.max_amount_required.to_string(),
            asset: cfg.asset,
            pay_to: cfg.pay_to,
            max_timeout_seconds: 60,
            extra: RequirementsExtra {
                name: cfg.asset_domain_name.clone(),
                version: cfg.asset_domain_version.clone(),
            },
        };
        let requirements_json = serde_json::to_vec(&requirements)?;

        let template_402 = PaymentRequiredBody {
            x402_version: X402_VERSION,
            error: "Payment required".to_string(),
            resource: PaymentResource {
                url: cfg.gateway_url.clone(),
                description: format!(
                    "RPC access: {} credits per payment",
                    cfg.credits_per_payment
                ),
                mime_type: String::new(),
            },
            accepts: vec![requirements],
            reason: None,
        };
        let body_402 = serde_json::to_vec(&template_402)?;
        let header_402 = base64::engine::general_purpose::STANDARD.encode(&body_402);

        Ok(Self {
            payments: payments.map(|(facilitator, tokens)| Payments {
                facilitator,
                tokens,
            }),
            upstream,
            credits_per_payment: cfg.credits_per_payment,
            requirements_json,
            body_402,
            header_402,
            template_402,
            seen: SeenPayments::new(),
        })
    }

    /// Handle one request.
    pub async fn serve(&self, req: &HttpRequest, body: web::Bytes) -> HttpResponse {
        // Only POST to / (standard JSON-RPC endpoint).
        if req.method() != Method::POST || req.path() != "/" {
            return HttpResponse::BadRequest().body("only POST / is supported");
        }

        // Pass-through mode: no facilitator configured, skip the payment gate
        // entirely, body inspection included.
        let Some(payments) = &self.payments else {
            return self.upstream.forward(req, body).await;
        };

        // Path 1: client presents a batch JWT.
        if let Some(token) = bearer_token(req) {
            if let Some(resp) = self.serve_with_token(payments, req, body.clone(), token).await {
                return resp;
            }
            // Token structurally invalid or expired: fall through to the
            // payment path. This is the only fall-through.
        }

        // Path 2: client presents an x402 payment payload.
        if let Some(encoded) = payment_signature(req) {
            return self.handle_payment(payments, encoded).await;
        }

        // Path 3: no credentials.
        self.send_402(None)
    }

    /// Validate the JWT and, if credits remain, proxy the request.
    /// `None` means the token is structurally invalid or expired and the
    /// caller should try the payment path.
    async fn serve_with_token(
        &self,
        payments: &Payments<F>,
        req: &HttpRequest,
        body: web::Bytes,
        token: &str,
    ) -> Option<HttpResponse> {
        let claims = match payments.tokens.validate(token) {
            Ok(claims) => claims,
            Err(_) => return None,
        };

        let remaining = match payments.tokens.consume(&claims) {
            Ok(remaining) => remaining,
            Err(X402Error::TokenExhausted) => {
                tracing::info!(tid = %claims.tid, "token exhausted");
                return Some(self.send_402(None));
            }
            Err(X402Error::TokenNotFound) => {
                // Valid signature but no counter entry: the server restarted.
                // Respond 402 directly; falling through to the payment path
                // could double-charge a request that also carries a
                // Payment-Signature header.
                tracing::warn!(tid = %claims.tid, "token not in store (server restarted?)");
                return Some(self.send_402(Some("token_not_found")));
            }
            Err(e) => {
                tracing::error!(tid = %claims.tid, error = %e, "counter store failure");
                return Some(HttpResponse::InternalServerError().body("internal error"));
            }
        };

        // The RPC method is extracted for logging only; a parse failure must
        // not fail the request.
        let method = rpc_method(&body);
        tracing::info!(
            method = %method,
            tid = %claims.tid,
            remaining,
            "proxying RPC request"
        );

        let mut resp = self.upstream.forward(req, body).await;
        if let Ok(value) = HeaderValue::try_from(remaining.to_string()) {
            resp.headers_mut()
                .insert(header::HeaderName::from_static(CREDITS_REMAINING_HEADER), value);
        }
        Some(resp)
    }

    /// Process an incoming x402 payment:
    /// verify, settle, issue a batch JWT, return the token to the client.
    async fn handle_payment(&self, payments: &Payments<F>, encoded: &str) -> HttpResponse {
        let payload_bytes = match base64::engine::general_purpose::STANDARD.decode(encoded) {
            Ok(bytes) => bytes,
            Err(_) => {
                return HttpResponse::BadRequest().body("invalid Payment-Signature encoding")
            }
        };

        // Claim the fingerprint before verification so one payment can never
        // buy two batch tokens, even under concurrent replay.
        let fingerprint = SeenPayments::fingerprint(&payload_bytes);
        if !self.seen.try_claim(fingerprint) {
            return HttpResponse::Conflict().body("payment already processed");
        }

        // A client disconnect drops this handler future and cancels the
        // in-flight facilitator call with it.
        let outcome = match payments
            .facilitator
            .verify(&payload_bytes, &self.requirements_json)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "payment verification failed");
                // Retract the fingerprint so the client can retry with a
                // corrected payload.
                self.seen.retract(fingerprint);
                return self.send_402(None);
            }
        };

        if let Err(e) = payments
            .facilitator
            .settle(&payload_bytes, &self.requirements_json)
            .await
        {
            tracing::warn!(error = %e, "payment settlement failed");
            // The fingerprint stays claimed: the settlement transaction may
            // have reached the mempool even though the call failed. Disputed
            // payments are handled out-of-band.
            return self.send_402(None);
        }

        let payer = outcome.payer.to_string();
        let token = match payments.tokens.issue(&payer, self.credits_per_payment) {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(error = %e, "failed to issue batch token");
                return HttpResponse::InternalServerError().body("internal error");
            }
        };

        tracing::info!(
            payer = %payer,
            credits = self.credits_per_payment,
            "issued batch token"
        );

        HttpResponse::Ok()
            .insert_header((PAYMENT_TOKEN_HEADER, token))
            .json(serde_json::json!({
                "message": "payment accepted - retry your RPC request with the token",
                "credits": self.credits_per_payment,
                "hint": "set Authorization: Bearer <token from X-Payment-Token header>",
            }))
    }

    /// Write a 402 Payment Required response, with an optional machine-readable
    /// reason code so clients can distinguish 402 causes.
    fn send_402(&self, reason: Option<&str>) -> HttpResponse {
        let mut builder = HttpResponse::PaymentRequired();
        builder.insert_header((PAYMENT_REQUIRED_HEADER, self.header_402.as_str()));
        builder.content_type("application/json");

        match reason {
            None => builder.body(self.body_402.clone()),
            Some(reason) => {
                let mut body = self.template_402.clone();
                body.reason = Some(reason.to_string());
                builder.json(body)
            }
        }
    }
}

/// actix entry point; everything routes through [`PaymentGate::serve`].
pub async fn entry<F, U>(
    req: HttpRequest,
    body: web::Bytes,
    gate: web::Data<PaymentGate<F, U>>,
) -> HttpResponse
where
    F: Facilitator + 'static,
    U: Upstream + 'static,
{
    gate.serve(&req, body).await
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn payment_signature(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(PAYMENT_SIGNATURE_HEADER)?
        .to_str()
        .ok()
        .filter(|value| !value.is_empty())
}

fn rpc_method(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|request| {
            request
                .get("method")
                .and_then(|m| m.as_str())
                .map(str::to_owned)
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_method_extracts_method_field() {
        assert_eq!(
            rpc_method(br#"{"jsonrpc":"2.0","method":"eth_blockNumber","id":1}"#),
            "eth_blockNumber"
        );
    }

    #[test]
    fn rpc_method_tolerates_garbage() {
        assert_eq!(rpc_method(b"not json"), "");
        assert_eq!(rpc_method(br#"{"method":42}"#), "");
        assert_eq!(rpc_method(b""), "");
    }
}
