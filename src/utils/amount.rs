//! 金额换算：链上最小单位 <-> 原生单位

use rust_decimal::Decimal;

/// 最小单位转原生单位字符串，例如 `1500000000000000000` wei → `"1.5"`
pub fn format_units(value: u128, decimals: u32) -> String {
    if let Ok(v) = i128::try_from(value) {
        if let Ok(d) = Decimal::try_from_i128_with_scale(v, decimals) {
            return d.normalize().to_string();
        }
    }

    // 超出 Decimal 精度（例如大额 yoctoNEAR），按字符串拆分
    let digits = value.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }
    let padded = format!("{:0>width$}", digits, width = decimals + 1);
    let (whole, frac) = padded.split_at(padded.len() - decimals);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{frac}")
    }
}

/// 原生单位转最小单位，小数位超出精度时截断；负数或超出 u128 返回 None
pub fn parse_units(amount: Decimal, decimals: u32) -> Option<u128> {
    if amount.is_sign_negative() {
        return None;
    }
    let mantissa = u128::try_from(amount.mantissa()).ok()?;
    let scale = amount.scale();
    if decimals >= scale {
        mantissa.checked_mul(10u128.checked_pow(decimals - scale)?)
    } else {
        Some(mantissa / 10u128.pow(scale - decimals))
    }
}
