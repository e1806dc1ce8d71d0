use proptest::prelude::*;
use ultralight::crypto::{self, TdesKey, BLOCK_SIZE};

fn key_strategy() -> impl Strategy<Value = TdesKey> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 16),
        prop::collection::vec(any::<u8>(), 24),
    ]
    .prop_map(|bytes| TdesKey::from_slice(&bytes).unwrap())
}

fn blocks_strategy() -> impl Strategy<Value = Vec<u8>> {
    (1usize..8).prop_flat_map(|blocks| prop::collection::vec(any::<u8>(), blocks * BLOCK_SIZE))
}

proptest! {
    #[test]
    fn decrypt_inverts_encrypt(key in key_strategy(), iv in any::<[u8; 8]>(), data in blocks_strategy()) {
        let ciphertext = crypto::encrypt(&key, &iv, &data).unwrap();
        prop_assert_eq!(ciphertext.len(), data.len());
        prop_assert_eq!(crypto::decrypt(&key, &iv, &ciphertext).unwrap(), data);
    }

    #[test]
    fn chained_calls_match_one_call(key in key_strategy(), iv in any::<[u8; 8]>(), data in blocks_strategy(), split in 1usize..8) {
        let split = (split % (data.len() / BLOCK_SIZE)).max(1) * BLOCK_SIZE;
        prop_assume!(split < data.len());

        let whole = crypto::encrypt(&key, &iv, &data).unwrap();
        let head = crypto::encrypt(&key, &iv, &data[..split]).unwrap();
        let next_iv = crypto::chain_iv(&head).unwrap();
        let tail = crypto::encrypt(&key, &next_iv, &data[split..]).unwrap();

        prop_assert_eq!(&whole[..split], &head[..]);
        prop_assert_eq!(&whole[split..], &tail[..]);
    }

    #[test]
    fn partial_blocks_rejected(key in key_strategy(), len in 0usize..40) {
        prop_assume!(len % BLOCK_SIZE != 0 || len == 0);
        let data = vec![0u8; len];
        prop_assert!(crypto::encrypt(&key, &crypto::ZERO_IV, &data).is_err());
        prop_assert!(crypto::decrypt(&key, &crypto::ZERO_IV, &data).is_err());
    }

    #[test]
    fn rotation_cycles_after_eight_steps(block in any::<[u8; 8]>()) {
        let mut rotated = block;
        for _ in 0..BLOCK_SIZE {
            rotated = crypto::rotate_left(&rotated);
        }
        prop_assert_eq!(rotated, block);
    }

    #[test]
    fn key_half_swap_is_involutive(key in key_strategy()) {
        let twice = key.swap_halves_endianness().swap_halves_endianness();
        prop_assert_eq!(twice.as_slice(), key.as_slice());
    }
}

#[test]
fn two_key_equals_repeated_three_key() {
    let two = TdesKey::from_hex("425245414b4d454946594f5543414e21").unwrap();
    let three =
        TdesKey::from_hex("425245414b4d454946594f5543414e21425245414b4d4549").unwrap();
    let data = [0x5Au8; 16];
    assert_eq!(
        crypto::encrypt(&two, &crypto::ZERO_IV, &data).unwrap(),
        crypto::encrypt(&three, &crypto::ZERO_IV, &data).unwrap()
    );
}
