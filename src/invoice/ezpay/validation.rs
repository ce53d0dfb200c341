//! ezPay business rules: defaulting, tax derivation, category/carrier checks
//! and the pipe-joined item encoding the provider expects.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::form_urlencoded;

use crate::invoice::payload::{required_text, text_or, RequestPayload, MAX_ITEM_VALUE};

/// Maximum length of `Comment`, in Unicode scalar values.
pub const DEFAULT_COMMENT_LENGTH: usize = 71;
/// API version sent when the provider config does not name one.
pub const DEFAULT_API_VERSION: &str = "1.4";
/// Standard business tax rate, in percent.
pub const STANDARD_TAX_RATE: i64 = 5;

const ITEM_SEPARATOR: &str = "|";

static LOVE_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{3,7}$").expect("love code pattern compiles"));
static MOBILE_CARRIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/[A-Z0-9+\-.]{7}$").expect("carrier pattern compiles"));

/// Business-rule violations that cannot be corrected with a default.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid amount")]
    MissingAmount,
    #[error("invalid print_flag")]
    MissingPrintFlag,
    #[error("empty buyer_email when carrier_type = 2")]
    MissingBuyerEmail,
    #[error("item count or price out of range")]
    ItemOutOfRange,
}

/// Tax fields derived from `TaxType` and `TotalAmt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxBreakdown {
    pub tax_rate: i64,
    pub tax_amt: i64,
    pub amt: i64,
    pub customs_clearance: bool,
}

/// Derives `TaxRate`, `TaxAmt` and `Amt` for a tax type.
///
/// `"2"` is tax-exempt (and flags customs clearance), `"3"` is zero-rated.
/// Everything else, `"1"` and `"9"` included, is taxed at the standard rate.
pub fn compute_tax(tax_type: &str, total_amt: i64) -> TaxBreakdown {
    match tax_type {
        "2" => TaxBreakdown {
            tax_rate: 0,
            tax_amt: 0,
            amt: total_amt,
            customs_clearance: true,
        },
        "3" => TaxBreakdown {
            tax_rate: 0,
            tax_amt: 0,
            amt: total_amt,
            customs_clearance: false,
        },
        // TODO: "9" (mixed tax) is provisionally taxed like "1"; it needs its
        // own per-item rules once ezPay's mixed-tax fields are supported.
        _ => {
            let tax_amt =
                (total_amt as f64 * (STANDARD_TAX_RATE as f64 / 100.0)).round() as i64;
            TaxBreakdown {
                tax_rate: STANDARD_TAX_RATE,
                tax_amt,
                amt: total_amt - tax_amt,
                customs_clearance: false,
            }
        }
    }
}

/// Fully defaulted request, ready to be form-encoded and encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalInvoiceRequest {
    pub respond_type: String,
    pub version: String,
    pub time_stamp: i64,
    pub merchant_order_no: String,
    pub status: String,
    pub category: String,
    pub buyer_name: String,
    pub buyer_ubn: Option<String>,
    pub buyer_address: Option<String>,
    pub buyer_email: String,
    /// `Some("")` means cleared, `None` means not sent at all.
    pub carrier_type: Option<String>,
    pub carrier_num: String,
    pub love_code: String,
    pub print_flag: String,
    pub tax_type: String,
    pub tax_rate: i64,
    pub customs_clearance: Option<String>,
    pub amt: i64,
    pub tax_amt: i64,
    pub total_amt: i64,
    pub item_name: String,
    pub item_count: String,
    pub item_unit: String,
    pub item_price: String,
    pub item_amt: Option<String>,
    pub comment: Option<String>,
}

impl CanonicalInvoiceRequest {
    /// Provider field names mapped to their string values, sorted by key.
    pub fn form_fields(&self) -> BTreeMap<&'static str, String> {
        let mut fields = BTreeMap::new();
        fields.insert("RespondType", self.respond_type.clone());
        fields.insert("Version", self.version.clone());
        fields.insert("TimeStamp", self.time_stamp.to_string());
        fields.insert("MerchantOrderNo", self.merchant_order_no.clone());
        fields.insert("Status", self.status.clone());
        fields.insert("Category", self.category.clone());
        fields.insert("BuyerName", self.buyer_name.clone());
        fields.insert("BuyerEmail", self.buyer_email.clone());
        fields.insert("CarrierNum", self.carrier_num.clone());
        fields.insert("LoveCode", self.love_code.clone());
        fields.insert("PrintFlag", self.print_flag.clone());
        fields.insert("TaxType", self.tax_type.clone());
        fields.insert("TaxRate", self.tax_rate.to_string());
        fields.insert("Amt", self.amt.to_string());
        fields.insert("TaxAmt", self.tax_amt.to_string());
        fields.insert("TotalAmt", self.total_amt.to_string());
        fields.insert("ItemName", self.item_name.clone());
        fields.insert("ItemCount", self.item_count.clone());
        fields.insert("ItemUnit", self.item_unit.clone());
        fields.insert("ItemPrice", self.item_price.clone());

        let optional = [
            ("BuyerUBN", &self.buyer_ubn),
            ("BuyerAddress", &self.buyer_address),
            ("CarrierType", &self.carrier_type),
            ("CustomsClearance", &self.customs_clearance),
            ("ItemAmt", &self.item_amt),
            ("Comment", &self.comment),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                fields.insert(key, value.clone());
            }
        }
        fields
    }

    /// `application/x-www-form-urlencoded` rendering of [`form_fields`](Self::form_fields).
    pub fn encode_form(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.form_fields())
            .finish()
    }
}

/// Normalizes `payload` using the current time for time-based defaults.
pub fn normalize(
    payload: &RequestPayload,
    api_version: &str,
) -> Result<CanonicalInvoiceRequest, ValidationError> {
    normalize_at(payload, api_version, Utc::now())
}

/// Normalizes `payload` into the provider's canonical request.
///
/// Only a missing `amount`, a missing `print_flag` or a missing buyer email
/// for email carriers are errors; every other gap is filled with a default.
pub fn normalize_at(
    payload: &RequestPayload,
    api_version: &str,
    now: DateTime<Utc>,
) -> Result<CanonicalInvoiceRequest, ValidationError> {
    let total_amt = payload.amount.ok_or(ValidationError::MissingAmount)?;
    let mut print_flag =
        required_text(&payload.print_flag).ok_or(ValidationError::MissingPrintFlag)?;

    let tax_type = text_or(&payload.tax_type, || "1".to_string());
    let category = text_or(&payload.category, || "B2C".to_string());
    let love_code = text_or(&payload.love_code, String::new);
    let buyer_email = text_or(&payload.buyer_email, String::new);
    let mut carrier_type = Some(text_or(&payload.carrier_type, String::new));
    let mut carrier_num = text_or(&payload.carrier_num, String::new);
    let mut buyer_ubn = None;
    let mut buyer_address = None;
    let mut comment = None;

    let tax = compute_tax(&tax_type, total_amt);

    let item_price: Vec<i64> = match category.as_str() {
        "B2B" => {
            print_flag = "Y".to_string();
            buyer_ubn = Some(text_or(&payload.buyer_ubn, || "-".to_string()));
            buyer_address = Some(text_or(&payload.buyer_address, || "-".to_string()));
            carrier_type = None;

            let divisor = 1.0 + tax.tax_rate as f64 / 100.0;
            payload
                .item_price
                .iter()
                .map(|price| whole_price(price / divisor))
                .collect::<Result<Vec<_>, _>>()?
        }
        other => {
            if other == "B2C" {
                if !love_code.is_empty() {
                    if LOVE_CODE_RE.is_match(&love_code) {
                        carrier_type = Some(String::new());
                    } else {
                        carrier_type = None;
                        print_flag = "Y".to_string();
                    }
                } else {
                    match carrier_type.as_deref() {
                        Some("0") | Some("1") => {
                            if MOBILE_CARRIER_RE.is_match(&carrier_num) {
                                carrier_num = carrier_num.trim().to_string();
                            } else {
                                carrier_type = None;
                                print_flag = "Y".to_string();
                                comment = Some(format!("Incorrect carrier num: {}", carrier_num));
                            }
                        }
                        Some("2") => {
                            if buyer_email.is_empty() {
                                return Err(ValidationError::MissingBuyerEmail);
                            }
                            carrier_num = buyer_email.clone();
                        }
                        _ => {
                            carrier_type = None;
                            print_flag = "Y".to_string();
                        }
                    }
                }
            }
            payload
                .item_price
                .iter()
                .map(|price| whole_price(*price))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let item_amt = if payload.item_count.len() == item_price.len() {
        let amounts = payload
            .item_count
            .iter()
            .zip(&item_price)
            .map(|(count, price)| {
                count
                    .checked_mul(*price)
                    .ok_or(ValidationError::ItemOutOfRange)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Some(join_numbers(amounts.into_iter()))
    } else {
        None
    };

    Ok(CanonicalInvoiceRequest {
        respond_type: text_or(&payload.response_type, || "JSON".to_string()),
        version: if api_version.is_empty() {
            DEFAULT_API_VERSION.to_string()
        } else {
            api_version.to_string()
        },
        time_stamp: now.timestamp(),
        merchant_order_no: text_or(&payload.merchant_order_no, || {
            now.format("%Y%m%d").to_string()
        }),
        status: text_or(&payload.status, || "1".to_string()),
        category,
        buyer_name: text_or(&payload.buyer_name, String::new),
        buyer_ubn,
        buyer_address,
        buyer_email,
        carrier_type,
        carrier_num,
        love_code,
        print_flag,
        tax_type,
        tax_rate: tax.tax_rate,
        customs_clearance: tax.customs_clearance.then(|| "1".to_string()),
        amt: tax.amt,
        tax_amt: tax.tax_amt,
        total_amt,
        item_name: payload.item_name.join(ITEM_SEPARATOR),
        item_count: join_numbers(payload.item_count.iter().copied()),
        item_unit: payload.item_unit.join(ITEM_SEPARATOR),
        item_price: join_numbers(item_price.iter().copied()),
        item_amt,
        comment: comment.map(|c| truncate_chars(&c, DEFAULT_COMMENT_LENGTH)),
    })
}

/// Rounds a price to whole currency units, refusing values outside the item range.
fn whole_price(price: f64) -> Result<i64, ValidationError> {
    let rounded = price.round();
    if rounded.is_finite() && rounded.abs() <= MAX_ITEM_VALUE as f64 {
        Ok(rounded as i64)
    } else {
        Err(ValidationError::ItemOutOfRange)
    }
}

fn join_numbers(values: impl Iterator<Item = i64>) -> String {
    values
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(ITEM_SEPARATOR)
}

fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((end, _)) => value[..end].to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 8, 30, 0).unwrap()
    }

    fn base_payload() -> RequestPayload {
        RequestPayload {
            amount: Some(100),
            print_flag: Some("N".into()),
            ..Default::default()
        }
    }

    fn b2c_with(f: impl FnOnce(&mut RequestPayload)) -> CanonicalInvoiceRequest {
        let mut payload = base_payload();
        f(&mut payload);
        normalize_at(&payload, "", fixed_now()).unwrap()
    }

    #[test]
    fn missing_amount_is_rejected() {
        let payload = RequestPayload {
            print_flag: Some("Y".into()),
            ..Default::default()
        };
        let err = normalize_at(&payload, "", fixed_now()).unwrap_err();
        assert_eq!(err, ValidationError::MissingAmount);
        assert_eq!(err.to_string(), "invalid amount");
    }

    #[test]
    fn missing_or_empty_print_flag_is_rejected() {
        let mut payload = RequestPayload {
            amount: Some(10),
            ..Default::default()
        };
        assert_eq!(
            normalize_at(&payload, "", fixed_now()).unwrap_err(),
            ValidationError::MissingPrintFlag
        );
        payload.print_flag = Some(String::new());
        assert_eq!(
            normalize_at(&payload, "", fixed_now()).unwrap_err().to_string(),
            "invalid print_flag"
        );
    }

    #[test]
    fn defaults_are_applied() {
        let req = normalize_at(&base_payload(), "", fixed_now()).unwrap();
        assert_eq!(req.respond_type, "JSON");
        assert_eq!(req.version, DEFAULT_API_VERSION);
        assert_eq!(req.merchant_order_no, "20240309");
        assert_eq!(req.time_stamp, fixed_now().timestamp());
        assert_eq!(req.status, "1");
        assert_eq!(req.tax_type, "1");
        assert_eq!(req.category, "B2C");
    }

    #[test]
    fn empty_strings_fall_back_to_defaults() {
        let req = b2c_with(|p| {
            p.response_type = Some(String::new());
            p.merchant_order_no = Some(String::new());
            p.category = Some(String::new());
        });
        assert_eq!(req.respond_type, "JSON");
        assert_eq!(req.merchant_order_no, "20240309");
        assert_eq!(req.category, "B2C");
    }

    #[test]
    fn configured_api_version_passes_through() {
        let req = normalize_at(&base_payload(), "1.5", fixed_now()).unwrap();
        assert_eq!(req.version, "1.5");
    }

    #[rstest]
    #[case("2", 0)]
    #[case("2", 1234)]
    #[case("3", 0)]
    #[case("3", 999)]
    fn exempt_and_zero_tax_keep_total(#[case] tax_type: &str, #[case] total: i64) {
        let tax = compute_tax(tax_type, total);
        assert_eq!(tax.tax_rate, 0);
        assert_eq!(tax.tax_amt, 0);
        assert_eq!(tax.amt, total);
        assert_eq!(tax.customs_clearance, tax_type == "2");
    }

    #[rstest]
    #[case("1", 100, 5, 95)]
    #[case("1", 101, 5, 96)]
    #[case("1", 30, 2, 28)]
    #[case("1", 29, 1, 28)]
    #[case("9", 101, 5, 96)]
    #[case("7", 200, 10, 190)]
    #[case("1", 0, 0, 0)]
    fn standard_tax_rounds_half_away_from_zero(
        #[case] tax_type: &str,
        #[case] total: i64,
        #[case] tax_amt: i64,
        #[case] amt: i64,
    ) {
        let tax = compute_tax(tax_type, total);
        assert_eq!(tax.tax_rate, STANDARD_TAX_RATE);
        assert_eq!(tax.tax_amt, tax_amt);
        assert_eq!(tax.amt, amt);
    }

    #[test]
    fn exempt_tax_sets_customs_clearance_field() {
        let req = b2c_with(|p| p.tax_type = Some("2".into()));
        assert_eq!(req.customs_clearance.as_deref(), Some("1"));
        assert_eq!(req.form_fields().get("CustomsClearance").map(String::as_str), Some("1"));

        let req = b2c_with(|p| p.tax_type = Some("3".into()));
        assert_eq!(req.customs_clearance, None);
    }

    #[test]
    fn end_to_end_b2c_request() {
        let payload = RequestPayload {
            amount: Some(100),
            print_flag: Some("1".into()),
            category: Some("B2C".into()),
            item_name: vec!["A".into()],
            item_count: vec![1],
            item_price: vec![100.0],
            item_unit: vec!["pcs".into()],
            ..Default::default()
        };
        let fields = normalize_at(&payload, "", fixed_now()).unwrap().form_fields();

        assert_eq!(fields["TaxRate"], "5");
        assert_eq!(fields["TaxAmt"], "5");
        assert_eq!(fields["Amt"], "95");
        assert_eq!(fields["TotalAmt"], "100");
        assert_eq!(fields["ItemName"], "A");
        assert_eq!(fields["ItemCount"], "1");
        assert_eq!(fields["ItemPrice"], "100");
        assert_eq!(fields["ItemAmt"], "100");
        assert_eq!(fields["ItemUnit"], "pcs");
    }

    #[test]
    fn b2b_forces_print_and_strips_tax_from_prices() {
        let payload = RequestPayload {
            amount: Some(315),
            print_flag: Some("N".into()),
            category: Some("B2B".into()),
            carrier_type: Some("0".into()),
            item_count: vec![2, 1],
            item_price: vec![105.0, 105.4],
            ..Default::default()
        };
        let req = normalize_at(&payload, "", fixed_now()).unwrap();

        assert_eq!(req.print_flag, "Y");
        assert_eq!(req.buyer_ubn.as_deref(), Some("-"));
        assert_eq!(req.buyer_address.as_deref(), Some("-"));
        assert_eq!(req.carrier_type, None);
        assert_eq!(req.item_price, "100|100");
        assert_eq!(req.item_amt.as_deref(), Some("200|100"));
        assert!(!req.form_fields().contains_key("CarrierType"));
    }

    #[test]
    fn b2b_keeps_supplied_buyer_fields() {
        let mut payload = base_payload();
        payload.category = Some("B2B".into());
        payload.buyer_ubn = Some("54352706".into());
        payload.buyer_address = Some("Taipei".into());
        let req = normalize_at(&payload, "", fixed_now()).unwrap();
        assert_eq!(req.buyer_ubn.as_deref(), Some("54352706"));
        assert_eq!(req.buyer_address.as_deref(), Some("Taipei"));
    }

    #[test]
    fn valid_love_code_clears_carrier_type() {
        let req = b2c_with(|p| {
            p.love_code = Some("1234567".into());
            p.carrier_type = Some("1".into());
        });
        assert_eq!(req.carrier_type.as_deref(), Some(""));
        assert_eq!(req.print_flag, "N");
    }

    #[test]
    fn malformed_love_code_forces_print() {
        let req = b2c_with(|p| {
            p.love_code = Some("12ab".into());
            p.carrier_type = Some("1".into());
        });
        assert_eq!(req.carrier_type, None);
        assert_eq!(req.print_flag, "Y");
    }

    #[rstest]
    #[case("123", true)]
    #[case("1234567", true)]
    #[case("12", false)]
    #[case("12345678", false)]
    fn love_code_length_bounds(#[case] love_code: &str, #[case] accepted: bool) {
        let req = b2c_with(|p| {
            p.love_code = Some(love_code.into());
            p.carrier_type = Some("1".into());
        });
        if accepted {
            assert_eq!(req.carrier_type.as_deref(), Some(""));
            assert_eq!(req.print_flag, "N");
        } else {
            assert_eq!(req.carrier_type, None);
            assert_eq!(req.print_flag, "Y");
        }
    }

    #[rstest]
    #[case("/ABCD123", true)]
    #[case("/ABC123", false)]
    #[case("/ABCD1234", false)]
    #[case("ABCD1234", false)]
    #[case("/abcd123", false)]
    fn carrier_num_length_bounds(#[case] carrier_num: &str, #[case] accepted: bool) {
        let req = b2c_with(|p| {
            p.carrier_type = Some("0".into());
            p.carrier_num = Some(carrier_num.into());
        });
        assert_eq!(req.carrier_type.is_some(), accepted);
        assert_eq!(req.comment.is_none(), accepted);
    }

    #[test]
    fn mobile_barcode_carrier_is_accepted() {
        let req = b2c_with(|p| {
            p.carrier_type = Some("0".into());
            p.carrier_num = Some("/ABC+-.1".into());
        });
        assert_eq!(req.carrier_type.as_deref(), Some("0"));
        assert_eq!(req.carrier_num, "/ABC+-.1");
        assert_eq!(req.comment, None);
    }

    #[test]
    fn bad_carrier_num_forces_print_with_comment() {
        let req = b2c_with(|p| {
            p.carrier_type = Some("1".into());
            p.carrier_num = Some("abc".into());
        });
        assert_eq!(req.carrier_type, None);
        assert_eq!(req.print_flag, "Y");
        assert_eq!(req.comment.as_deref(), Some("Incorrect carrier num: abc"));
    }

    #[test]
    fn long_comment_is_truncated_by_characters() {
        let carrier_num = "發".repeat(80);
        let req = b2c_with(|p| {
            p.carrier_type = Some("0".into());
            p.carrier_num = Some(carrier_num.clone());
        });
        let comment = req.comment.unwrap();
        assert_eq!(comment.chars().count(), DEFAULT_COMMENT_LENGTH);
        assert!(comment.starts_with("Incorrect carrier num: 發"));
    }

    #[test]
    fn email_carrier_requires_buyer_email() {
        let mut payload = base_payload();
        payload.category = Some("B2C".into());
        payload.carrier_type = Some("2".into());
        payload.buyer_email = Some(String::new());
        let err = normalize_at(&payload, "", fixed_now()).unwrap_err();
        assert_eq!(err, ValidationError::MissingBuyerEmail);
        assert_eq!(err.to_string(), "empty buyer_email when carrier_type = 2");
    }

    #[test]
    fn email_carrier_uses_buyer_email_as_carrier_num() {
        let req = b2c_with(|p| {
            p.carrier_type = Some("2".into());
            p.carrier_num = Some("ignored".into());
            p.buyer_email = Some("buyer@example.com".into());
        });
        assert_eq!(req.carrier_type.as_deref(), Some("2"));
        assert_eq!(req.carrier_num, "buyer@example.com");
    }

    #[test]
    fn unknown_or_missing_carrier_forces_print() {
        for carrier in [None, Some("5".to_string())] {
            let req = b2c_with(|p| p.carrier_type = carrier.clone());
            assert_eq!(req.carrier_type, None);
            assert_eq!(req.print_flag, "Y");
        }
    }

    #[test]
    fn b2c_prices_are_rounded() {
        let req = b2c_with(|p| {
            p.item_count = vec![3, 1];
            p.item_price = vec![10.5, 19.4];
        });
        assert_eq!(req.item_price, "11|19");
        assert_eq!(req.item_amt.as_deref(), Some("33|19"));
    }

    #[test]
    fn oversized_item_amount_is_an_error() {
        let mut payload = base_payload();
        payload.item_count = vec![10_000_000_000];
        payload.item_price = vec![10_000_000_000.0];
        assert_eq!(
            normalize_at(&payload, "", fixed_now()).unwrap_err(),
            ValidationError::ItemOutOfRange
        );

        payload.item_count = vec![i64::MAX];
        payload.item_price = vec![2.0];
        assert_eq!(
            normalize_at(&payload, "", fixed_now()).unwrap_err(),
            ValidationError::ItemOutOfRange
        );

        payload.category = Some("B2B".into());
        payload.item_count = vec![1];
        payload.item_price = vec![f64::INFINITY];
        assert_eq!(
            normalize_at(&payload, "", fixed_now()).unwrap_err(),
            ValidationError::ItemOutOfRange
        );
    }

    #[test]
    fn mismatched_item_arrays_omit_item_amt() {
        let req = b2c_with(|p| {
            p.item_count = vec![1, 2];
            p.item_price = vec![10.0];
        });
        assert_eq!(req.item_amt, None);
        assert!(!req.form_fields().contains_key("ItemAmt"));
    }

    #[test]
    fn form_encoding_escapes_values() {
        let req = b2c_with(|p| {
            p.buyer_name = Some("王 小明&Co".into());
            p.item_name = vec!["A".into(), "B".into()];
        });
        let encoded = req.encode_form();
        assert!(encoded.contains("BuyerName=%E7%8E%8B+%E5%B0%8F%E6%98%8E%26Co"));
        assert!(encoded.contains("ItemName=A%7CB"));
        assert!(encoded.starts_with("Amt="));
    }
}
