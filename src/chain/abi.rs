// Contract interfaces we call, plus the decoding glue around alloy's codec.

use alloy_sol_types::{sol, SolCall};

use crate::error::{AppResult, RpcError};

sol! {
    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);

        function name() external view returns (string);
        function symbol() external view returns (string);
        // uint8 in the standard, uint256 in some older tokens; same word either way
        function decimals() external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function balanceOf(address owner) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
    }

    interface IConverter {
        function converterType() external view returns (uint16);
        function anchor() external view returns (address);
        function reserveTokens(uint256 index) external view returns (address);
        function reserveBalance(address token) external view returns (uint256);
    }
}

/// Decode the return data of `C`, mapping codec failures to `RpcError::Decode`
pub fn decode_returns<C: SolCall>(data: &[u8]) -> AppResult<C::Return> {
    C::abi_decode_returns(data, true).map_err(|e| {
        RpcError::Decode {
            what: C::SIGNATURE.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Decode a `string` returned by `C`. Some older tokens return `bytes32`
/// instead, which is accepted as a NUL-padded string.
pub fn decode_text<C: SolCall>(data: &[u8], text: impl FnOnce(C::Return) -> String) -> AppResult<String> {
    if data.len() == 32 {
        let trimmed: Vec<u8> = data.iter().copied().take_while(|b| *b != 0).collect();
        return Ok(String::from_utf8_lossy(&trimmed).into_owned());
    }
    decode_returns::<C>(data).map(text)
}
