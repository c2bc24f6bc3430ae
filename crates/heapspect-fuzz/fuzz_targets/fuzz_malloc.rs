#![no_main]
use heapspect_core::BackEnd;
use heapspect_core::passthrough::PassthroughBackEnd;
use libfuzzer_sys::fuzz_target;

const ALIGNMENTS: [usize; 4] = [8, 16, 64, 4096];

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let back_end = PassthroughBackEnd::new();
    let mut live: Vec<(*mut u8, usize, usize)> = Vec::new();

    for chunk in data.chunks(4) {
        if chunk.len() < 4 {
            break;
        }
        let op = chunk[0] % 3;
        let size = (u16::from_le_bytes([chunk[1], chunk[2]]) as usize).clamp(1, 65536);
        let align = ALIGNMENTS[chunk[3] as usize % ALIGNMENTS.len()];

        match op {
            0 => {
                if let Some(ptr) = back_end.alloc(size, align) {
                    assert_eq!((ptr as usize) % align, 0);
                    live.push((ptr, size, align));
                }
            }
            1 => {
                if let Some((ptr, _, _)) = live.pop() {
                    // SAFETY: ptr was allocated above and not yet freed.
                    unsafe { back_end.dealloc(ptr) };
                }
            }
            _ => {
                if let Some(&(ptr, old_size, align)) = live.last() {
                    let new_size = (old_size / 2).max(1);
                    // SAFETY: ptr was allocated above with `align`.
                    if let Some(grown) = unsafe { back_end.realloc(ptr, align, new_size) } {
                        live.pop();
                        live.push((grown, new_size, align));
                    }
                }
            }
        }
    }

    for (ptr, _, _) in live {
        // SAFETY: each ptr is still live and was allocated above.
        unsafe { back_end.dealloc(ptr) };
    }
});
