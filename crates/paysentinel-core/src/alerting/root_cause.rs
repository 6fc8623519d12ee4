//! Priority ladder attributing a breach to a cause and remediation

use crate::models::{ActionType, AlertType, IssuerBreakdown, RootCause, SuggestedAction};

/// Provider credentials rejected
const CODE_UNAUTHORIZED: &str = "401";
/// Transaction not permitted in the region
const CODE_REGULATORY_BLOCK: &str = "57";
const CODE_SERVER_ERROR: &str = "500";
const TIMEOUT_CODES: [&str; 3] = ["502", "503", "504"];

/// Evidence the resolver works from
#[derive(Debug, Clone, Copy)]
pub struct Evidence<'a> {
    pub provider: &'a str,
    pub country: &'a str,
    pub alert_type: AlertType,
    pub most_common_code: Option<&'a str>,
    /// Issuers with at least the qualifying number of affected transactions
    pub issuers: &'a [IssuerBreakdown],
}

/// Resolve the cause. First match wins; the same evidence always yields the same result.
pub fn resolve(evidence: &Evidence<'_>) -> (RootCause, SuggestedAction) {
    let provider = evidence.provider;
    let country = evidence.country;
    let code = evidence.most_common_code;

    match code {
        Some(CODE_UNAUTHORIZED) => {
            return (
                cause(
                    provider,
                    "Merchant Configuration Error - Invalid API Credentials".to_string(),
                    format!("All {provider} transactions"),
                    code,
                ),
                action(format!("Update API Keys for {provider}"), ActionType::UpdateCredentials),
            );
        }
        Some(CODE_REGULATORY_BLOCK) => {
            return (
                cause(
                    provider,
                    format!("Regulatory/Regional Block in {country}"),
                    format!("Transactions not permitted in {country}"),
                    code,
                ),
                action(format!("Review Country Rules for {country}"), ActionType::ReviewCompliance),
            );
        }
        _ => {}
    }

    if let [issuer] = evidence.issuers {
        let name = &issuer.issuer_name;
        return (
            cause(
                provider,
                with_code(format!("Elevated errors for {name} cards"), code),
                format!("{name} issuers only"),
                code,
            ),
            action(format!("Failover {name} to backup provider"), ActionType::FailoverProvider),
        );
    }

    let suggested = match code {
        Some(c) if TIMEOUT_CODES.contains(&c) => action(
            format!("Increase timeout or failover {provider}"),
            ActionType::IncreaseTimeout,
        ),
        Some(CODE_SERVER_ERROR) => action(
            format!("Contact {provider} - Internal server error"),
            ActionType::ContactProvider,
        ),
        _ => action(format!("Pause traffic to {provider}"), ActionType::PauseTraffic),
    };

    (
        cause(
            provider,
            with_code(format!("{} across {country}", evidence.alert_type.title()), code),
            "All transactions".to_string(),
            code,
        ),
        suggested,
    )
}

fn with_code(issue: String, code: Option<&str>) -> String {
    match code {
        Some(code) => format!("{issue} (HTTP {code})"),
        None => issue,
    }
}

fn cause(provider: &str, issue: String, scope: String, code: Option<&str>) -> RootCause {
    RootCause {
        provider: provider.to_string(),
        issue,
        scope,
        response_code: code.map(String::from),
    }
}

fn action(label: String, action_type: ActionType) -> SuggestedAction {
    SuggestedAction { label, action_type }
}
