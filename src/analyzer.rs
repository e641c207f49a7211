//! Descriptor analyzer
//!
//! Checks that a parsed descriptor names an instantiation the harness can
//! drive, and derives the operand shape constants from it.

use crate::descriptor::{Descriptor, ElemKind};
use crate::error::{HarnessError, HarnessResult};
use crate::hardware::{VecMacConfig, ACC_BITS, COEF_BITS, DATA_BITS};

/// Analyzer for accelerator descriptors
pub struct Analyzer;

impl Analyzer {
    pub fn new() -> Self {
        Self
    }

    /// Validate a descriptor and produce the MAC unit configuration
    pub fn analyze(&self, desc: &Descriptor) -> HarnessResult<VecMacConfig> {
        let data = &desc.data;
        let coef = &desc.coef;
        let lanes = &desc.lanes;

        // only one input data register
        if data.count != 1 {
            return Err(HarnessError::precondition(format!(
                "exactly one data operand is supported, got {}",
                data.count
            )));
        }

        for (what, kind) in [("data", data.kind), ("coef", coef.kind)] {
            if kind == ElemKind::SignedAcc {
                return Err(HarnessError::precondition(format!(
                    "{} operand must be U or I, got S",
                    what
                )));
            }
        }

        if data.kind.is_signed() || !coef.kind.is_signed() {
            return Err(HarnessError::precondition(format!(
                "unsupported signedness combination {}{} x {}{}, only U x I is supported",
                data.kind.letter(),
                data.bits,
                coef.kind.letter(),
                coef.bits
            )));
        }

        if data.bits != DATA_BITS || coef.bits != COEF_BITS {
            return Err(HarnessError::precondition(format!(
                "operand widths must be {} and {} bits, got {} and {}",
                DATA_BITS, COEF_BITS, data.bits, coef.bits
            )));
        }

        if lanes.kind != ElemKind::SignedAcc || lanes.bits != ACC_BITS {
            return Err(HarnessError::precondition(format!(
                "accumulators must be S{}, got {}{}",
                ACC_BITS,
                lanes.kind.letter(),
                lanes.bits
            )));
        }

        let macs = data.width;
        if macs == 0 || lanes.lanes == 0 {
            return Err(HarnessError::precondition("empty data vector or no lanes"));
        }

        if coef.explicit_count {
            // one coef register per lane, each as wide as the data register
            if coef.count != lanes.lanes {
                return Err(HarnessError::precondition(format!(
                    "{} coef vectors do not feed {} lanes",
                    coef.count, lanes.lanes
                )));
            }
            if coef.width != macs {
                return Err(HarnessError::precondition(format!(
                    "coef vectors of {} elements do not match the data width {}",
                    coef.width, macs
                )));
            }
        } else {
            // short form: total coef elements split evenly across the lanes
            if coef.elements() % macs != 0 {
                return Err(HarnessError::precondition(format!(
                    "coef elements {} are not a multiple of the data width {}",
                    coef.elements(),
                    macs
                )));
            }
            let coef_vectors = coef.elements() / macs;
            if coef_vectors != lanes.lanes {
                return Err(HarnessError::precondition(format!(
                    "{} coef vectors of {} elements do not feed {} lanes",
                    coef_vectors, macs, lanes.lanes
                )));
            }
        }

        Ok(VecMacConfig::new(macs, lanes.lanes))
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn analyze(source: &str) -> HarnessResult<VecMacConfig> {
        let desc = Parser::new(source).parse_descriptor()?;
        Analyzer::new().analyze(&desc)
    }

    #[test]
    fn test_analyze_long_form() {
        let config = analyze("1x8U8-2x8I8-2S32").unwrap();
        assert_eq!(config, VecMacConfig::new(8, 2));
    }

    #[test]
    fn test_analyze_short_form() {
        let config = analyze("8U8-16I8-2S32").unwrap();
        assert_eq!(config, VecMacConfig::new(8, 2));

        let config = analyze("4U8-16I8-4S32").unwrap();
        assert_eq!(config, VecMacConfig::new(4, 4));
    }

    #[test]
    fn test_analyze_two_data_operands() {
        let err = analyze("2x8U8-2x8I8-2S32").unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("one data operand"));
    }

    #[test]
    fn test_analyze_signedness() {
        let err = analyze("1x8I8-2x8I8-2S32").unwrap_err();
        assert!(err.to_string().contains("signedness"));

        let err = analyze("1x8U8-2x8U8-2S32").unwrap_err();
        assert!(err.to_string().contains("signedness"));
    }

    #[test]
    fn test_analyze_lane_mismatch() {
        assert!(analyze("1x8U8-2x8I8-4S32").is_err());
        assert!(analyze("1x8U8-2x4I8-2S32").is_err());
    }

    #[test]
    fn test_analyze_long_form_coef_shape() {
        // right element total, wrong register shape
        let err = analyze("1x8U8-4x4I8-2S32").unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("4 coef vectors"));

        let err = analyze("1x8U8-1x16I8-2S32").unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("1 coef vectors"));

        let err = analyze("1x8U8-2x4I8-2S32").unwrap_err();
        assert!(err.to_string().contains("data width 8"));
    }

    #[test]
    fn test_analyze_short_form_split() {
        assert!(analyze("8U8-12I8-2S32").is_err());
        assert!(analyze("8U8-24I8-2S32").is_err());
    }

    #[test]
    fn test_analyze_accumulator_width() {
        assert!(analyze("1x8U8-2x8I8-2S16").is_err());
        assert!(analyze("1x8U8-2x8I8-2U32").is_err());
    }
}
