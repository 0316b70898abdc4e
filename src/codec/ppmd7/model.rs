//! Context tree maintenance for variant H.

use tracing::debug;

use super::{Ppmd7, MAX_ORDER};
use crate::codec::sub_alloc::STATE_SIZE;
use crate::codec::{See, SeeRef, BIN_SCALE, INIT_BIN_ESC, MAX_FREQ, PERIOD_BITS};

impl Ppmd7 {
    /// Rebuilds the order-0 model: one root context holding all 256 symbols
    /// at frequency 1.
    pub(super) fn restart_model(&mut self) {
        self.sa.reset();

        self.order_fall = self.max_order;
        self.init_rl = -(self.max_order.min(12) as i32) - 1;
        self.run_length = self.init_rl;
        self.prev_success = 0;

        let root = self.sa.alloc_initial_context();
        let stats = self.sa.alloc_initial(256 / 2);
        self.min_context = root;
        self.max_context = root;
        self.found_state = stats;
        self.set_num_stats(root, 256);
        self.sa.set_summ_freq(root, 256 + 1);
        self.sa.set_stats(root, stats);
        self.sa.set_suffix(root, 0);
        for sym in 0..=255u8 {
            let s = stats + u32::from(sym) * STATE_SIZE;
            self.sa.write_state(s, sym, 1, 0);
        }

        for (i, row) in self.bin_summ.iter_mut().enumerate() {
            for (k, &esc) in INIT_BIN_ESC.iter().enumerate() {
                let val = (BIN_SCALE - u32::from(esc) / (i as u32 + 2)) as u16;
                for m in (0..64).step_by(8) {
                    row[k + m] = val;
                }
            }
        }

        for (i, row) in self.see.iter_mut().enumerate() {
            let summ = ((5 * i as u32 + 10) << (PERIOD_BITS - 4)) as u16;
            row.fill(See::new(summ, 4));
        }
        self.dummy_see = See::dummy();
    }

    /// Restart forced by an exhausted arena.
    fn restart_exhausted(&mut self) {
        self.restarts += 1;
        debug!(
            restarts = self.restarts,
            arena = self.sa.size(),
            "variant H arena exhausted, restarting model"
        );
        self.restart_model();
    }

    /// Turns the raw successor of the found state into real contexts, one
    /// per order up to the current one. `None` when the arena is full.
    fn create_successors(&mut self) -> Option<u32> {
        let mut c = self.min_context;
        let mut up_branch = self.sa.state_successor(self.found_state);
        let found_symbol = self.sa.state_symbol(self.found_state);
        let mut ps = [0u32; MAX_ORDER as usize + 1];
        let mut num_ps = 0;

        if self.order_fall != 0 {
            ps[num_ps] = self.found_state;
            num_ps += 1;
        }

        loop {
            let suffix = self.sa.suffix(c);
            if suffix == 0 {
                break;
            }
            c = suffix;
            let s = if self.num_stats(c) != 1 {
                self.sa.find_state(self.sa.stats(c), found_symbol)
            } else {
                c + 2
            };
            let successor = self.sa.state_successor(s);
            if successor != up_branch {
                c = successor;
                if num_ps == 0 {
                    return Some(c);
                }
                break;
            }
            ps[num_ps] = s;
            num_ps += 1;
        }

        let new_sym = self.sa.read_u8(up_branch);
        up_branch += 1;

        let new_freq = if self.num_stats(c) == 1 {
            self.sa.state_freq(c + 2)
        } else {
            let s = self.sa.find_state(self.sa.stats(c), new_sym);
            let cf = self.sa.state_freq(s) - 1;
            let s0 = self
                .sa
                .summ_freq(c)
                .wrapping_sub(self.num_stats(c))
                .wrapping_sub(cf);
            1 + if 2 * cf <= s0 {
                u32::from(5 * cf > s0)
            } else {
                (2 * cf + s0 - 1) / (2 * s0) + 1
            }
        };

        for &s in ps[..num_ps].iter().rev() {
            let c1 = self.sa.alloc_context()?;
            self.set_num_stats(c1, 1);
            self.sa.write_state(c1 + 2, new_sym, new_freq, up_branch);
            self.sa.set_suffix(c1, c);
            self.sa.set_state_successor(s, c1);
            c = c1;
        }
        Some(c)
    }

    /// Adds the found symbol to every context between `max_context` and
    /// `min_context` and moves to the next context.
    pub(super) fn update_model(&mut self) {
        let f_symbol = self.sa.state_symbol(self.found_state);
        let f_freq = self.sa.state_freq(self.found_state);

        let suffix = self.sa.suffix(self.min_context);
        if f_freq < MAX_FREQ / 4 && suffix != 0 {
            let c = suffix;
            if self.num_stats(c) == 1 {
                let s = c + 2;
                let freq = self.sa.state_freq(s);
                if freq < 32 {
                    self.sa.set_state_freq(s, freq + 1);
                }
            } else {
                let stats = self.sa.stats(c);
                let mut s = self.sa.find_state(stats, f_symbol);
                if s != stats
                    && self.sa.state_freq(s) >= self.sa.state_freq(s - STATE_SIZE)
                {
                    self.sa.swap_states(s, s - STATE_SIZE);
                    s -= STATE_SIZE;
                }
                let freq = self.sa.state_freq(s);
                if freq < MAX_FREQ - 9 {
                    self.sa.set_state_freq(s, freq + 2);
                    let summ = self.sa.summ_freq(c);
                    self.sa.set_summ_freq(c, summ + 2);
                }
            }
        }

        if self.order_fall == 0 {
            match self.create_successors() {
                Some(ctx) => {
                    self.min_context = ctx;
                    self.max_context = ctx;
                    self.sa.set_state_successor(self.found_state, ctx);
                }
                None => self.restart_exhausted(),
            }
            return;
        }

        let text = self.sa.text;
        self.sa.write_u8(text, f_symbol);
        self.sa.text = text + 1;
        if self.sa.text >= self.sa.units_start {
            self.restart_exhausted();
            return;
        }
        let mut max_successor = self.sa.text;

        let mut min_successor = self.sa.state_successor(self.found_state);
        if min_successor != 0 {
            if min_successor <= max_successor {
                match self.create_successors() {
                    Some(cs) => min_successor = cs,
                    None => {
                        self.restart_exhausted();
                        return;
                    }
                }
            }
            self.order_fall -= 1;
            if self.order_fall == 0 {
                max_successor = min_successor;
                if self.max_context != self.min_context {
                    self.sa.text -= 1;
                }
            }
        } else {
            self.sa.set_state_successor(self.found_state, max_successor);
            min_successor = self.min_context;
        }

        let mc = self.min_context;
        let mut c = self.max_context;
        self.min_context = min_successor;
        self.max_context = min_successor;
        if c == mc {
            return;
        }

        let ns = self.num_stats(mc);
        let s0 = self
            .sa
            .summ_freq(mc)
            .wrapping_sub(ns)
            .wrapping_sub(f_freq - 1);

        loop {
            let ns1 = self.num_stats(c);
            let mut sum;
            if ns1 != 1 {
                if ns1 & 1 == 0 {
                    let Some(stats) = self.sa.expand_units(self.sa.stats(c), ns1 >> 1) else {
                        self.restart_exhausted();
                        return;
                    };
                    self.sa.set_stats(c, stats);
                }
                sum = self.sa.summ_freq(c);
                sum += u32::from(2 * ns1 < ns)
                    + 2 * (u32::from(4 * ns1 <= ns) & u32::from(sum <= 8 * ns1));
            } else {
                let Some(s) = self.sa.alloc_units(0) else {
                    self.restart_exhausted();
                    return;
                };
                let mut freq = self.sa.state_freq(c + 2);
                self.sa.copy_state(s, c + 2);
                self.sa.set_stats(c, s);
                freq = if freq < MAX_FREQ / 4 - 1 {
                    freq * 2
                } else {
                    MAX_FREQ - 4
                };
                self.sa.set_state_freq(s, freq);
                sum = freq + self.init_esc + u32::from(ns > 3);
            }

            let s = self.sa.stats(c) + ns1 * STATE_SIZE;
            let mut cf = 2 * (sum + 6) * f_freq;
            let sf = s0.wrapping_add(sum);
            self.sa.write_u8(s, f_symbol);
            self.set_num_stats(c, ns1 + 1);
            self.sa.set_state_successor(s, max_successor);
            if cf < 6 * sf {
                cf = 1 + u32::from(cf > sf) + u32::from(cf >= 4 * sf);
                sum += 3;
            } else {
                cf = 4
                    + u32::from(cf >= 9 * sf)
                    + u32::from(cf >= 12 * sf)
                    + u32::from(cf >= 15 * sf);
                sum += cf;
            }
            self.sa.set_summ_freq(c, sum);
            self.sa.set_state_freq(s, cf);

            c = self.sa.suffix(c);
            if c == mc {
                break;
            }
        }
    }

    /// Halves the frequencies of `min_context`, sorts its states and drops
    /// the ones that reach zero.
    fn rescale(&mut self) {
        let mc = self.min_context;
        let stats = self.sa.stats(mc);

        let mut s = self.found_state;
        while s != stats {
            self.sa.swap_states(s, s - STATE_SIZE);
            s -= STATE_SIZE;
        }

        let first = self.sa.state_freq(stats);
        let mut esc_freq = self.sa.summ_freq(mc).wrapping_sub(first);
        let adder = u32::from(self.order_fall != 0);
        let mut sum_freq = (first + 4 + adder) >> 1;
        self.sa.set_state_freq(stats, sum_freq);

        let ns = self.num_stats(mc);
        for i in 1..ns {
            let s = stats + i * STATE_SIZE;
            let mut freq = self.sa.state_freq(s);
            esc_freq = esc_freq.wrapping_sub(freq);
            freq = (freq + adder) >> 1;
            sum_freq += freq;
            self.sa.set_state_freq(s, freq);
            let mut s1 = s;
            while s1 != stats && freq > self.sa.state_freq(s1 - STATE_SIZE) {
                self.sa.swap_states(s1, s1 - STATE_SIZE);
                s1 -= STATE_SIZE;
            }
        }

        let mut s = stats + (ns - 1) * STATE_SIZE;
        if self.sa.state_freq(s) == 0 {
            let mut removed = 0;
            loop {
                removed += 1;
                s -= STATE_SIZE;
                if self.sa.state_freq(s) != 0 {
                    break;
                }
            }
            esc_freq = esc_freq.wrapping_add(removed);
            let ns_new = ns - removed;
            self.set_num_stats(mc, ns_new);
            let n0 = (ns + 1) >> 1;

            if ns_new == 1 {
                let mut freq = self.sa.state_freq(stats);
                loop {
                    esc_freq >>= 1;
                    freq = (freq + 1) >> 1;
                    if esc_freq <= 1 {
                        break;
                    }
                }
                let one = mc + 2;
                self.sa.copy_state(one, stats);
                self.sa.set_state_freq(one, freq);
                self.found_state = one;
                self.sa.free_units(stats, n0);
                return;
            }

            let n1 = (ns_new + 1) >> 1;
            if n0 != n1 {
                let shrunk = self.sa.shrink_units(stats, n0, n1);
                self.sa.set_stats(mc, shrunk);
            }
        }

        self.sa.set_summ_freq(
            mc,
            sum_freq
                .wrapping_add(esc_freq)
                .wrapping_sub(esc_freq >> 1),
        );
        self.found_state = self.sa.stats(mc);
    }

    /// Picks the SEE cell for an escape out of `min_context` and takes its
    /// estimate.
    pub(super) fn make_esc_freq(&mut self, num_masked: u32) -> (SeeRef, u32) {
        let mc = self.min_context;
        let ns = self.num_stats(mc);
        if ns == 256 {
            return (SeeRef::Dummy, 1);
        }
        let non_masked = ns - num_masked;
        let row = usize::from(self.ns2index[(non_masked - 1) as usize]);
        let suffix_ns = self.num_stats(self.sa.suffix(mc));
        let col = usize::from(non_masked < suffix_ns.wrapping_sub(ns))
            + 2 * usize::from(self.sa.summ_freq(mc) < 11 * ns)
            + 4 * usize::from(num_masked > non_masked)
            + self.hi_bits_flag as usize;
        let esc = self.see[row][col].take_mean();
        (SeeRef::Cell(row, col), esc)
    }

    pub(super) fn see_mut(&mut self, see: SeeRef) -> &mut See {
        match see {
            SeeRef::Dummy => &mut self.dummy_see,
            SeeRef::Cell(row, col) => &mut self.see[row][col],
        }
    }

    fn next_context(&mut self) {
        let c = self.sa.state_successor(self.found_state);
        if self.order_fall == 0 && c > self.sa.text {
            self.min_context = c;
            self.max_context = c;
        } else {
            self.update_model();
        }
    }

    /// Found a symbol other than the first one of a multi-symbol context.
    pub(super) fn update1(&mut self) {
        let mut s = self.found_state;
        let freq = self.sa.state_freq(s) + 4;
        let mc = self.min_context;
        let summ = self.sa.summ_freq(mc);
        self.sa.set_summ_freq(mc, summ + 4);
        self.sa.set_state_freq(s, freq);
        if freq > self.sa.state_freq(s - STATE_SIZE) {
            self.sa.swap_states(s, s - STATE_SIZE);
            s -= STATE_SIZE;
            self.found_state = s;
            if freq > MAX_FREQ {
                self.rescale();
            }
        }
        self.next_context();
    }

    /// Found the first symbol of a multi-symbol context.
    pub(super) fn update1_0(&mut self) {
        let s = self.found_state;
        let mc = self.min_context;
        let freq = self.sa.state_freq(s);
        let summ = self.sa.summ_freq(mc);
        self.prev_success = u32::from(2 * freq > summ);
        self.run_length += self.prev_success as i32;
        self.sa.set_summ_freq(mc, summ + 4);
        self.sa.set_state_freq(s, freq + 4);
        if freq + 4 > MAX_FREQ {
            self.rescale();
        }
        self.next_context();
    }

    /// Found a symbol after one or more escapes.
    pub(super) fn update2(&mut self) {
        let s = self.found_state;
        let freq = self.sa.state_freq(s) + 4;
        self.run_length = self.init_rl;
        let mc = self.min_context;
        let summ = self.sa.summ_freq(mc);
        self.sa.set_summ_freq(mc, summ + 4);
        self.sa.set_state_freq(s, freq);
        if freq > MAX_FREQ {
            self.rescale();
        }
        self.update_model();
    }

    /// Found the symbol of a binary context.
    pub(super) fn update_bin(&mut self, s: u32) {
        self.found_state = s;
        self.prev_success = 1;
        self.run_length += 1;
        let freq = self.sa.state_freq(s);
        self.sa.set_state_freq(s, freq + u32::from(freq < 128));
        self.next_context();
    }
}
