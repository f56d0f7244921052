use candle_core::Tensor;

/// Average the hidden states of attended tokens, then scale each row to
/// unit length.
///
/// `hidden` is `[batch, tokens, dim]`; `attention_mask` is `[batch, tokens]`
/// with 1 for real tokens and 0 for padding. Returns `[batch, dim]`.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    let weights = attention_mask
        .to_device(hidden.device())?
        .to_dtype(hidden.dtype())?
        .unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&weights)?.sum(1)?;
    let counts = weights.sum(1)?.maximum(1e-9)?;
    let mean = summed.broadcast_div(&counts)?;
    let norms = mean.sqr()?.sum_keepdim(1)?.sqrt()?.maximum(1e-12)?;
    mean.broadcast_div(&norms)
}
